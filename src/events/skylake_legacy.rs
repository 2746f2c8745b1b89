//! Legacy Skylake event mapping, as used by early captures.
//!
//! Single-counter metrics throughout. The DTLB entry counts loads rather
//! than TLB misses; profiles captured with it carry that known skew.

use super::EventMapping;

pub static MAPPING: EventMapping = EventMapping {
    br_misses: &["BR_MISP_RETIRED"],
    l1i_misses: &["FRONTEND_RETIRED.L1I_MISS"],
    l1d_misses: &["MEM_LOAD_UOPS_RETIRED.L1_MISS"],
    l2_misses: &["MEM_LOAD_UOPS_RETIRED.L2_MISS"],
    itlb_misses: &["FRONTEND_RETIRED.ITLB_MISS"],
    dtlb_misses: &["DTLB-LOADS"],
};
