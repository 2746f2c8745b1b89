//! Per-microarchitecture event mappings.
//!
//! Each supported microarchitecture measures the same output metric set
//! with its own hardware events; the mapping below is the only place that
//! difference lives.

pub mod skylake;
pub mod broadwell;
pub mod skylake_legacy;

use crate::{ Error, Result };

/// The profiled machine's microarchitecture, selecting one of the fixed
/// event-mapping variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Microarch {
    Skylake,
    Broadwell,
    /// The original Skylake mapping, kept for comparing against profiles
    /// captured before the miss counters were revised.
    SkylakeLegacy,
}

impl Microarch {
    pub fn mapping(&self) -> &'static EventMapping {
        match self {
            Self::Skylake => &skylake::MAPPING,
            Self::Broadwell => &broadwell::MAPPING,
            Self::SkylakeLegacy => &skylake_legacy::MAPPING,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Skylake => "skylake",
            Self::Broadwell => "broadwell",
            Self::SkylakeLegacy => "skylake-legacy",
        }
    }
}

impl std::str::FromStr for Microarch {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        match tag {
            "skylake" => Ok(Self::Skylake),
            "broadwell" => Ok(Self::Broadwell),
            "skylake-legacy" => Ok(Self::SkylakeLegacy),
            _ => Err(Error::Configuration(format!(
                "unsupported architecture tag: {:?}", tag
            ))),
        }
    }
}

/// The hardware events backing each miss-rate metric on one
/// microarchitecture.
///
/// A metric lists one or more component events. Each component becomes its
/// own misses-per-kilo-instruction series (independently filtered for its
/// own missing samples), and the components are then truncated to the
/// shortest length and summed elementwise. Metrics measured by a single
/// counter are the one-component case of the same rule.
pub struct EventMapping {
    pub br_misses: &'static [&'static str],
    pub l1i_misses: &'static [&'static str],
    pub l1d_misses: &'static [&'static str],
    pub l2_misses: &'static [&'static str],
    pub itlb_misses: &'static [&'static str],
    pub dtlb_misses: &'static [&'static str],
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for arch in [
            Microarch::Skylake,
            Microarch::Broadwell,
            Microarch::SkylakeLegacy,
        ] {
            assert_eq!(arch.tag().parse::<Microarch>().unwrap(), arch);
        }
    }

    #[test]
    fn unsupported_tag_is_a_configuration_error() {
        let err = "alderlake".parse::<Microarch>().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn every_mapping_names_every_metric() {
        for arch in [
            Microarch::Skylake,
            Microarch::Broadwell,
            Microarch::SkylakeLegacy,
        ] {
            let m = arch.mapping();
            for events in [
                m.br_misses, m.l1i_misses, m.l1d_misses,
                m.l2_misses, m.itlb_misses, m.dtlb_misses,
            ] {
                assert!(!events.is_empty(), "{:?}", arch);
            }
        }
    }
}
