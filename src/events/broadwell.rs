//! Broadwell event mapping.
//!
//! No FRONTEND_RETIRED events on this core: L1I misses come from the
//! ICACHE counter and the ITLB metric sums STLB hits with walks.

use super::EventMapping;

pub static MAPPING: EventMapping = EventMapping {
    br_misses: &["BR_MISP_RETIRED.ALL_BRANCHES"],
    l1i_misses: &["ICACHE.MISSES"],
    l1d_misses: &[
        "MEM_LOAD_UOPS_RETIRED.L1_MISS",
        "L2_TRANS.RFO",
    ],
    l2_misses: &[
        "MEM_LOAD_UOPS_RETIRED.L2_MISS",
        "OFFCORE_REQUESTS.DEMAND_RFO",
    ],
    itlb_misses: &[
        "ITLB_MISSES.STLB_HIT",
        "ITLB_MISSES.MISS_CAUSES_A_WALK",
    ],
    dtlb_misses: &[
        "DTLB_LOAD_MISSES.STLB_HIT",
        "DTLB_LOAD_MISSES.MISS_CAUSES_A_WALK",
        "DTLB_STORE_MISSES.STLB_HIT",
        "DTLB_STORE_MISSES.MISS_CAUSES_A_WALK",
    ],
};
