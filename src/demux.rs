//! Reconstruction of true per-event counts from a time-multiplexed sample
//! stream, and the canonical phase table it produces.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use itertools::Itertools;

use crate::schema::{ CounterSchema, RawLog, RawPhaseSample, FIXED_EVENTS };
use crate::{ Error, Result };

/// One row of the canonical phase table. Immutable once created; persisted
/// as one canonical CSV row and re-read by later process runs.
#[derive(Clone, Debug)]
pub struct CanonicalPhaseRecord {
    /// The sample's cumulative cycle counter value.
    pub timestamp: u64,
    /// Cycles elapsed since the previous record, regardless of group.
    pub ref_cycles: f64,
    pub time_running: u64,
    pub time_enabled: u64,
    /// RDT local-memory-traffic delta for this phase, when captured.
    pub local_mem_traffic: Option<f64>,
    /// RDT LLC-occupancy delta for this phase, when captured.
    pub l3_occupancy: Option<f64>,
    /// One slot per schema event; populated only for the active group.
    pub events: Vec<Option<f64>>,
}

/// Multiplexing bookkeeping for one counter group: the last cumulative
/// values seen for it.
struct GroupBaseline {
    time_enabled: u64,
    time_running: u64,
    raw: Vec<u64>,
}

/// Mutable state threaded through one demultiplexer invocation. Never a
/// process-wide global: every invocation starts from scratch.
#[derive(Default)]
struct DemuxState {
    total_tsc: u64,
    baselines: BTreeMap<u32, GroupBaseline>,
    last_local_mem_traffic: u64,
    last_l3_occupancy: u64,
}

/// Consumes raw samples in file order and reconstructs absolute per-phase
/// counter values, undoing the scaling introduced by counter-group
/// time-multiplexing.
pub struct Demultiplexer {
    state: DemuxState,
}

impl Demultiplexer {
    pub fn new() -> Self {
        Self { state: DemuxState::default() }
    }

    /// Reduce a raw log to the canonical phase table.
    pub fn demux(mut self, log: &RawLog) -> Result<PhaseTable> {
        let mut records = Vec::with_capacity(log.samples.len());
        for sample in &log.samples {
            records.push(self.demux_one(&log.schema, sample)?);
        }
        Ok(PhaseTable {
            events: log.schema.events().to_vec(),
            has_rdt: log.rdt,
            records,
        })
    }

    fn demux_one(
        &mut self,
        schema: &CounterSchema,
        sample: &RawPhaseSample,
    ) -> Result<CanonicalPhaseRecord>
    {
        let ref_cycles = sample.tsc as f64 - self.state.total_tsc as f64;
        self.state.total_tsc = sample.tsc;

        // RDT extras sit outside the multiplexed group mechanism: their
        // deltas are tracked stream-wide, not per group.
        let local_mem_traffic = sample.local_mem_traffic.map(|cur| {
            let delta = cur as f64 - self.state.last_local_mem_traffic as f64;
            self.state.last_local_mem_traffic = cur;
            delta
        });
        let l3_occupancy = sample.l3_occupancy.map(|cur| {
            let delta = cur as f64 - self.state.last_l3_occupancy as f64;
            self.state.last_l3_occupancy = cur;
            delta
        });

        let group_events = schema.group_events(sample.group_id)?;
        let mut events = vec![None; schema.events().len()];

        match self.state.baselines.entry(sample.group_id) {
            // First occurrence: the sample is an absolute reading, scaled by
            // the fraction of enabled time the group was actually running.
            Entry::Vacant(entry) => {
                let multiplier = check_multiplier(
                    sample.group_id,
                    sample.time_running as f64,
                    sample.time_enabled as f64,
                )?;
                for (slot, name) in group_events.iter().enumerate() {
                    let raw = sample.raw_events[slot];
                    events[schema.event_index(name).unwrap()] =
                        Some(raw as f64 * (1.0 / multiplier));
                }
                entry.insert(GroupBaseline {
                    time_enabled: sample.time_enabled,
                    time_running: sample.time_running,
                    raw: sample.raw_events.clone(),
                });
            }
            // Later occurrences: deltas against the stored cumulative
            // baseline, scaled by the multiplier over this interval.
            Entry::Occupied(mut entry) => {
                let baseline = entry.get_mut();
                if sample.time_enabled <= baseline.time_enabled
                    || sample.time_running <= baseline.time_running
                {
                    return Err(Error::DataCorruption(format!(
                        "group {} counters not monotonic \
                         (enabled {} -> {}, running {} -> {}): \
                         counter wrap or stream corruption",
                        sample.group_id,
                        baseline.time_enabled, sample.time_enabled,
                        baseline.time_running, sample.time_running,
                    )));
                }
                let multiplier = check_multiplier(
                    sample.group_id,
                    (sample.time_running - baseline.time_running) as f64,
                    (sample.time_enabled - baseline.time_enabled) as f64,
                )?;
                for (slot, name) in group_events.iter().enumerate() {
                    let raw = sample.raw_events[slot];
                    let delta = raw as f64 - baseline.raw[slot] as f64;
                    events[schema.event_index(name).unwrap()] =
                        Some(delta * (1.0 / multiplier));
                    baseline.raw[slot] = raw;
                }
                baseline.time_enabled = sample.time_enabled;
                baseline.time_running = sample.time_running;
            }
        }

        Ok(CanonicalPhaseRecord {
            timestamp: sample.tsc,
            ref_cycles,
            time_running: sample.time_running,
            time_enabled: sample.time_enabled,
            local_mem_traffic,
            l3_occupancy,
            events,
        })
    }
}

impl Default for Demultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

/// The multiplexing multiplier is the fraction of enabled time the group
/// spent scheduled on hardware counters. Anything outside [0,1] means the
/// kernel's bookkeeping was violated; exactly 0 means the group was never
/// scheduled and nothing can be reconstructed from it.
fn check_multiplier(group_id: u32, running: f64, enabled: f64) -> Result<f64> {
    let multiplier = running / enabled;
    if !(0.0..=1.0).contains(&multiplier) {
        return Err(Error::DataCorruption(format!(
            "group {} multiplexing multiplier {} outside [0,1]",
            group_id, multiplier
        )));
    }
    if multiplier == 0.0 {
        return Err(Error::DataCorruption(format!(
            "group {} was never scheduled (time_running stuck)", group_id
        )));
    }
    Ok(multiplier)
}

/// Token marking a schema event that was inactive for a phase.
const MISSING: &str = "nan";

/// The canonical phase table: one [CanonicalPhaseRecord] per raw sample
/// line, with the schema's full column set.
#[derive(Clone, Debug)]
pub struct PhaseTable {
    events: Vec<String>,
    has_rdt: bool,
    records: Vec<CanonicalPhaseRecord>,
}

impl PhaseTable {
    /// Schema event names, in canonical column order.
    pub fn events(&self) -> &[String] {
        &self.events
    }

    /// Whether the capture carried the RDT extras.
    pub fn has_rdt(&self) -> bool {
        self.has_rdt
    }

    pub fn records(&self) -> &[CanonicalPhaseRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The per-phase values of one schema event, missing where the event's
    /// group was not active.
    pub fn event_series(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.events.iter().position(|e| e == name)?;
        Some(self.records.iter().map(|r| r.events[idx]).collect())
    }

    pub fn ref_cycles(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.ref_cycles).collect()
    }

    pub fn local_mem_traffic(&self) -> Vec<Option<f64>> {
        self.records.iter().map(|r| r.local_mem_traffic).collect()
    }

    /// Persist the table in the canonical CSV format.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut f = std::fs::File::create(path)
            .map_err(|e| Error::io(path, e))?;
        self.write_csv_to(&mut f).map_err(|e| Error::io(path, e))
    }

    fn write_csv_to(&self, out: &mut impl Write) -> std::io::Result<()> {
        let mut columns =
            vec!["timestamp", "ref_cycles", "time_running", "time_enabled"];
        if self.has_rdt {
            columns.extend(["local_mem_traffic", "l3_occupancy"]);
        }
        let events = self.events.iter().map(|e| e.as_str());
        let header: Vec<&str> = columns.into_iter().chain(events).collect();
        writeln!(out, "{}", header.join(","))?;

        for r in &self.records {
            let mut row = format!(
                "{},{},{},{}",
                r.timestamp, r.ref_cycles, r.time_running, r.time_enabled
            );
            if self.has_rdt {
                row.push_str(&format!(
                    ",{},{}",
                    fmt_opt(r.local_mem_traffic), fmt_opt(r.l3_occupancy)
                ));
            }
            let events = r.events.iter().map(|v| fmt_opt(*v)).join(",");
            writeln!(out, "{},{}", row, events)?;
        }
        Ok(())
    }

    /// Read a previously persisted canonical CSV back into a table.
    pub fn read_csv(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::io(path, e))?;
        Self::parse_csv(&text)
    }

    pub fn parse_csv(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let header: Vec<&str> = lines.next()
            .ok_or_else(|| Error::DataCorruption(
                "canonical CSV has no header".to_string()
            ))?
            .split(',').collect();

        const BASE: [&str; 4] =
            ["timestamp", "ref_cycles", "time_running", "time_enabled"];
        if header.len() < BASE.len() || header[..BASE.len()] != BASE {
            return Err(Error::DataCorruption(format!(
                "unexpected canonical CSV header: {:?}", header
            )));
        }
        let has_rdt = header.get(4) == Some(&"local_mem_traffic");
        let event_start = if has_rdt { 6 } else { 4 };
        let events: Vec<String> =
            header[event_start..].iter().map(|e| e.to_string()).collect();

        let mut records = Vec::new();
        for line in lines {
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() != header.len() {
                return Err(Error::DataCorruption(format!(
                    "canonical CSV row with {} fields, expected {}",
                    fields.len(), header.len()
                )));
            }
            records.push(CanonicalPhaseRecord {
                timestamp: parse_u64(fields[0])?,
                ref_cycles: parse_f64(fields[1])?,
                time_running: parse_u64(fields[2])?,
                time_enabled: parse_u64(fields[3])?,
                local_mem_traffic:
                    if has_rdt { parse_opt(fields[4])? } else { None },
                l3_occupancy:
                    if has_rdt { parse_opt(fields[5])? } else { None },
                events: fields[event_start..].iter()
                    .map(|f| parse_opt(f))
                    .collect::<Result<_>>()?,
            });
        }

        // The fixed-function columns are part of the canonical layout.
        for fixed in FIXED_EVENTS {
            if !events.iter().any(|e| e == fixed) {
                return Err(Error::DataCorruption(format!(
                    "canonical CSV is missing the {} column", fixed
                )));
            }
        }
        Ok(Self { events, has_rdt, records })
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(x) => format!("{}", x),
        None => MISSING.to_string(),
    }
}

fn parse_u64(field: &str) -> Result<u64> {
    field.parse().map_err(|_| {
        Error::DataCorruption(format!("bad integer field: {:?}", field))
    })
}

fn parse_f64(field: &str) -> Result<f64> {
    field.parse().map_err(|_| {
        Error::DataCorruption(format!("bad numeric field: {:?}", field))
    })
}

fn parse_opt(field: &str) -> Result<Option<f64>> {
    let v = parse_f64(field)?;
    Ok(if v.is_nan() { None } else { Some(v) })
}
