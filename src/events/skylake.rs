//! Skylake event mapping.
//!
//! Loads and stores reach L1D/L2 through different counters here, so those
//! metrics sum a demand-load component and an RFO component; the DTLB
//! metric splits further into STLB-hit and walk components per access kind.

use super::EventMapping;

pub static MAPPING: EventMapping = EventMapping {
    br_misses: &["BR_MISP_RETIRED.ALL_BRANCHES"],
    l1i_misses: &["FRONTEND_RETIRED.L1I_MISS"],
    l1d_misses: &[
        "MEM_LOAD_RETIRED.L1_MISS",
        "L2_RQSTS.ALL_RFO",
    ],
    l2_misses: &[
        "MEM_LOAD_RETIRED.L2_MISS",
        "OFFCORE_REQUESTS.DEMAND_RFO",
    ],
    itlb_misses: &["FRONTEND_RETIRED.ITLB_MISS"],
    dtlb_misses: &[
        "DTLB_LOAD_MISSES.STLB_HIT",
        "DTLB_LOAD_MISSES.MISS_CAUSES_A_WALK",
        "DTLB_STORE_MISSES.STLB_HIT",
        "DTLB_STORE_MISSES.MISS_CAUSES_A_WALK",
    ],
};
