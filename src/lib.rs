
pub mod schema;
pub mod demux;
pub mod stats;
pub mod events;
pub mod profile;
pub mod cost;
pub mod harness;
pub mod util;

use std::path::PathBuf;

pub use crate::schema::{ CounterSchema, RawLog, RawPhaseSample };
pub use crate::demux::{ Demultiplexer, CanonicalPhaseRecord, PhaseTable };
pub use crate::events::Microarch;
pub use crate::profile::{ MicroarchProfile, RunAverages };
pub use crate::cost::{
    Metric,
    CostWeights,
    CostBreakdown,
    DistanceCostEngine,
    BlackBoxTarget,
};
pub use crate::harness::*;

/// Errors surfaced by the reduction-and-scoring pipeline.
///
/// A NaN subcost is deliberately *not* an error: it is logged and treated as
/// zero contribution, so a single degenerate metric never blocks a search.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The requested computation cannot be set up (wrong architecture
    /// mapping for the capture, bad curve dimensions, missing target
    /// configuration, mismatched thread lists).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The captured profile is unusable (multiplexing bookkeeping violated,
    /// unknown counter group mid-stream, malformed sample line).
    #[error("corrupt profile data: {0}")]
    DataCorruption(String),

    /// A raw log, canonical CSV, curve file, or configs record could not be
    /// read or written.
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
