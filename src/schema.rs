//! Raw profiler log parsing and the counter-group schema.

use std::collections::BTreeMap;
use std::path::Path;

use crate::{ Error, Result };

/// The fixed-function events occupying the first three slots of every
/// counter group. They are sampled in every group rotation, so the canonical
/// table carries a value for them in every row.
pub const FIXED_EVENTS: [&str; 3] = [
    "UNHALTED_REFERENCE_CYCLES",
    "INST_RETIRED",
    "CPU_CLK_UNHALTED",
];

/// Static table mapping counter group identifiers to their ordered event
/// names, built once from a raw log's header block.
///
/// The canonical column order is the three fixed-function events followed by
/// the union of all groups' extra events, and it never changes after the
/// header block has been consumed: a data line referring to anything outside
/// this table is a data error, not a silent extension.
#[derive(Clone, Debug)]
pub struct CounterSchema {
    groups: BTreeMap<u32, Vec<String>>,
    events: Vec<String>,
    index: BTreeMap<String, usize>,
}

impl CounterSchema {
    /// Build the schema from the header block (`group <id> <event> ...`
    /// lines, already tokenized).
    pub fn from_headers(headers: &[Vec<&str>]) -> Result<Self> {
        let mut groups = BTreeMap::new();
        let mut events: Vec<String> =
            FIXED_EVENTS.iter().map(|e| e.to_string()).collect();

        for header in headers {
            if header.len() < 2 + FIXED_EVENTS.len() {
                return Err(Error::DataCorruption(format!(
                    "group header with fewer than {} events: {:?}",
                    FIXED_EVENTS.len(), header
                )));
            }
            let group_id = parse_int::<u32>(header[1], "group id")?;
            let names: Vec<String> =
                header[2..].iter().map(|e| e.to_string()).collect();

            for (slot, fixed) in FIXED_EVENTS.iter().enumerate() {
                if names[slot] != *fixed {
                    return Err(Error::DataCorruption(format!(
                        "group {} slot {} holds {:?}, expected fixed-function {:?}",
                        group_id, slot, names[slot], fixed
                    )));
                }
            }
            for extra in &names[FIXED_EVENTS.len()..] {
                if !events.iter().any(|e| e == extra) {
                    events.push(extra.clone());
                }
            }
            if groups.insert(group_id, names).is_some() {
                return Err(Error::DataCorruption(format!(
                    "group {} declared twice in header block", group_id
                )));
            }
        }

        let index = events.iter().enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();
        Ok(Self { groups, events, index })
    }

    /// The canonical column order (fixed-function events first).
    pub fn events(&self) -> &[String] {
        &self.events
    }

    /// The ordered event names sampled by one group.
    pub fn group_events(&self, group_id: u32) -> Result<&[String]> {
        self.groups.get(&group_id).map(|v| v.as_slice()).ok_or_else(|| {
            Error::DataCorruption(format!(
                "sample references group {} absent from the header block",
                group_id
            ))
        })
    }

    /// Canonical column slot for an event name.
    pub fn event_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }
}

/// One sampled phase, exactly as it appears in the raw log: cumulative
/// counter values for the group that was active during this phase.
#[derive(Clone, Debug)]
pub struct RawPhaseSample {
    pub group_id: u32,
    pub cpu: u32,
    pub tid: u32,
    pub timestamp_ns: u64,
    /// Cumulative cycle counter, running across all groups.
    pub tsc: u64,
    /// Cumulative time this group was enabled, in ns.
    pub time_enabled: u64,
    /// Cumulative time this group was actually scheduled on hardware
    /// counters, in ns.
    pub time_running: u64,
    /// Cumulative RDT local-memory-traffic counter, when captured.
    pub local_mem_traffic: Option<u64>,
    /// Cumulative RDT LLC-occupancy counter, when captured.
    pub l3_occupancy: Option<u64>,
    /// Raw cumulative counts, one per event of the active group.
    pub raw_events: Vec<u64>,
}

/// Number of per-line counters preceding the group's event counts.
const NON_GROUP_CTRS: usize = 7;
const NON_GROUP_CTRS_RDT: usize = 9;

impl RawPhaseSample {
    fn parse(tokens: &[&str], schema: &CounterSchema, rdt: bool) -> Result<Self> {
        let non_group = if rdt { NON_GROUP_CTRS_RDT } else { NON_GROUP_CTRS };
        if tokens.len() < non_group {
            return Err(Error::DataCorruption(format!(
                "sample line with {} fields, expected at least {}",
                tokens.len(), non_group
            )));
        }

        let group_id = parse_int::<u32>(tokens[0], "group id")?;
        let expected = non_group + schema.group_events(group_id)?.len();
        if tokens.len() != expected {
            return Err(Error::DataCorruption(format!(
                "group {} sample with {} fields, expected {}",
                group_id, tokens.len(), expected
            )));
        }

        let (local_mem_traffic, l3_occupancy) = if rdt {
            (Some(parse_int(tokens[7], "local_mem_traffic")?),
             Some(parse_int(tokens[8], "l3_occupancy")?))
        } else {
            (None, None)
        };

        let raw_events = tokens[non_group..].iter()
            .map(|t| parse_int(t, "event count"))
            .collect::<Result<Vec<u64>>>()?;

        Ok(Self {
            group_id,
            cpu: parse_int(tokens[1], "cpu")?,
            tid: parse_int(tokens[2], "tid")?,
            timestamp_ns: parse_int(tokens[3], "timestamp")?,
            tsc: parse_int(tokens[4], "tsc")?,
            time_enabled: parse_int(tokens[5], "time_enabled")?,
            time_running: parse_int(tokens[6], "time_running")?,
            local_mem_traffic,
            l3_occupancy,
            raw_events,
        })
    }
}

/// A raw profiler log: the schema from its header block plus every complete
/// sample line, in file order.
#[derive(Clone, Debug)]
pub struct RawLog {
    pub schema: CounterSchema,
    pub samples: Vec<RawPhaseSample>,
    /// Whether sample lines carry the RDT extras.
    pub rdt: bool,
}

impl RawLog {
    /// Read and parse a raw log.
    ///
    /// The profiler appends lines and never rewrites them, so an interrupted
    /// capture can leave one partial line at the end of the file; that line
    /// is dropped with a warning. A malformed line anywhere else is fatal.
    pub fn read(path: &Path, rdt: bool) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::io(path, e))?;
        Self::parse(&text, rdt)
    }

    pub fn parse(text: &str, rdt: bool) -> Result<Self> {
        let lines: Vec<Vec<&str>> = text.lines()
            .map(|l| l.split_whitespace().collect())
            .filter(|t: &Vec<&str>| !t.is_empty())
            .collect();

        let header_len = lines.iter()
            .take_while(|t| t[0] == "group")
            .count();
        if lines[header_len..].iter().any(|t| t[0] == "group") {
            return Err(Error::DataCorruption(
                "group header after the first data line".to_string()
            ));
        }
        let schema = CounterSchema::from_headers(&lines[..header_len])?;

        let data = &lines[header_len..];
        let mut samples = Vec::with_capacity(data.len());
        for (idx, tokens) in data.iter().enumerate() {
            match RawPhaseSample::parse(tokens, &schema, rdt) {
                Ok(sample) => samples.push(sample),
                // Tolerate a truncated capture: only the final line may be
                // partial.
                Err(e) if idx == data.len() - 1 => {
                    log::warn!("dropping partial final sample line: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Self { schema, samples, rdt })
    }
}

fn parse_int<T: std::str::FromStr>(token: &str, what: &str) -> Result<T> {
    token.parse::<T>().map_err(|_| {
        Error::DataCorruption(format!("bad {}: {:?}", what, token))
    })
}

#[cfg(test)]
mod test {
    use super::*;

    const LOG: &str = "\
group 0 UNHALTED_REFERENCE_CYCLES INST_RETIRED CPU_CLK_UNHALTED A B
group 1 UNHALTED_REFERENCE_CYCLES INST_RETIRED CPU_CLK_UNHALTED C
0 0 100 1000 10000 800 800 1 2 3 4 5
1 0 100 2000 10100 900 900 6 7 8 9
";

    #[test]
    fn schema_columns_are_fixed_plus_extras() {
        let log = RawLog::parse(LOG, false).unwrap();
        assert_eq!(
            log.schema.events(),
            &["UNHALTED_REFERENCE_CYCLES", "INST_RETIRED",
              "CPU_CLK_UNHALTED", "A", "B", "C"]
        );
        assert_eq!(log.schema.num_groups(), 2);
        assert_eq!(log.samples.len(), 2);
        assert_eq!(log.samples[0].raw_events, vec![1, 2, 3, 4, 5]);
        assert_eq!(log.samples[1].group_id, 1);
    }

    #[test]
    fn unknown_group_is_fatal() {
        // The bad line is not the final one, so truncation tolerance does
        // not apply.
        let text = format!(
            "{}7 0 100 3000 10300 950 950 1 2 3 4 5\n\
             1 0 100 4000 10400 1000 1000 6 7 8 9\n",
            LOG
        );
        let err = RawLog::parse(&text, false).unwrap_err();
        assert!(matches!(err, Error::DataCorruption(_)));
    }

    #[test]
    fn partial_final_line_is_dropped() {
        let text = format!("{}0 0 100 3000 10300 950", LOG);
        let log = RawLog::parse(&text, false).unwrap();
        assert_eq!(log.samples.len(), 2);
    }

    #[test]
    fn short_mid_stream_line_is_fatal() {
        let text = "\
group 0 UNHALTED_REFERENCE_CYCLES INST_RETIRED CPU_CLK_UNHALTED A
0 0 100 1000 10000 800
0 0 100 2000 10100 900 900 1 2 3 4
";
        assert!(RawLog::parse(text, false).is_err());
    }

    #[test]
    fn rdt_extras_are_parsed() {
        let text = "\
group 0 UNHALTED_REFERENCE_CYCLES INST_RETIRED CPU_CLK_UNHALTED A
0 0 100 1000 10000 800 800 4096 64 1 2 3 9
";
        let log = RawLog::parse(text, true).unwrap();
        assert_eq!(log.samples[0].local_mem_traffic, Some(4096));
        assert_eq!(log.samples[0].l3_occupancy, Some(64));
        assert_eq!(log.samples[0].raw_events, vec![1, 2, 3, 9]);
    }
}
