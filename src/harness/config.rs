//! Cost-pass configuration.

use crate::cost::{ BlackBoxTarget, CostWeights };
use crate::events::Microarch;

/// Configuration for one search's cost passes.
#[derive(Clone, Copy, Debug)]
pub struct HarnessConfig {
    /// Microarchitecture of the profiled machine.
    pub arch: Microarch,

    /// TSC frequency of the machine candidates run on, in MHz. The
    /// reference profile uses the frequency recorded in its own
    /// target-configs record instead.
    pub tsc_freq_mhz: u64,

    /// Per-metric weights applied when aggregating subcosts.
    pub weights: CostWeights,

    /// When set, candidates are scored against this single scalar target
    /// instead of a reference profile.
    pub black_box: Option<BlackBoxTarget>,

    /// Whether raw logs carry the RDT extras.
    pub rdt: bool,

    /// Ignore curve files even when present.
    pub skip_curves: bool,
}

impl HarnessConfig {
    pub fn new(arch: Microarch, tsc_freq_mhz: u64) -> Self {
        Self {
            arch,
            tsc_freq_mhz,
            weights: CostWeights::default(),
            black_box: None,
            rdt: true,
            skip_curves: false,
        }
    }

    pub fn weights(mut self, weights: CostWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn black_box(mut self, target: BlackBoxTarget) -> Self {
        self.black_box = Some(target);
        self
    }

    pub fn no_rdt(mut self) -> Self {
        self.rdt = false;
        self
    }

    pub fn skip_curves(mut self) -> Self {
        self.skip_curves = true;
        self
    }
}
