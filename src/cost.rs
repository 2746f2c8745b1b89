//! Distance-based scoring of a candidate profile against a reference.

use std::collections::BTreeMap;

use crate::profile::{ MicroarchProfile, RunAverages };
use crate::stats::{ normalize_samples, wasserstein_distance, CurveMatrix };
use crate::{ Error, Result };

/// Number of associativity ways sampled by the curve sweep. Curve costs
/// are only defined for this width.
pub const CURVE_WAYS: usize = 12;

/// The fixed metric set compared between two profiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Metric {
    Ci,
    L1iMpki,
    L1dMpki,
    L2Mpki,
    BrMpki,
    ItlbMpki,
    DtlbMpki,
    LocMembw,
    /// Aggregated miss-rate-curve cost across the 12 ways.
    Mrc,
    /// Aggregated IPC-curve cost across the 12 ways.
    Ipc,
}

impl Metric {
    pub const ALL: [Metric; 10] = [
        Metric::Ci,
        Metric::L1iMpki,
        Metric::L1dMpki,
        Metric::L2Mpki,
        Metric::BrMpki,
        Metric::ItlbMpki,
        Metric::DtlbMpki,
        Metric::LocMembw,
        Metric::Mrc,
        Metric::Ipc,
    ];

    /// The scalar-series metrics (everything but the curve aggregates).
    pub const SCALAR: [Metric; 8] = [
        Metric::Ci,
        Metric::L1iMpki,
        Metric::L1dMpki,
        Metric::L2Mpki,
        Metric::BrMpki,
        Metric::ItlbMpki,
        Metric::DtlbMpki,
        Metric::LocMembw,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Ci => "ci",
            Metric::L1iMpki => "l1i_mpki",
            Metric::L1dMpki => "l1d_mpki",
            Metric::L2Mpki => "l2_mpki",
            Metric::BrMpki => "br_mpki",
            Metric::ItlbMpki => "itlb_mpki",
            Metric::DtlbMpki => "dtlb_mpki",
            Metric::LocMembw => "loc_membw",
            Metric::Mrc => "mrc",
            Metric::Ipc => "ipc",
        }
    }

    fn index(&self) -> usize {
        Self::ALL.iter().position(|m| m == self).unwrap()
    }
}

/// Per-metric weights applied to the subcosts. Defaults to 1.0 everywhere.
#[derive(Clone, Copy, Debug)]
pub struct CostWeights([f64; Metric::ALL.len()]);

impl Default for CostWeights {
    fn default() -> Self {
        Self([1.0; Metric::ALL.len()])
    }
}

impl CostWeights {
    /// Weights in [Metric::ALL] order.
    pub fn new(weights: [f64; Metric::ALL.len()]) -> Self {
        Self(weights)
    }

    pub fn get(&self, metric: Metric) -> f64 {
        self.0[metric.index()]
    }

    pub fn set(mut self, metric: Metric, weight: f64) -> Self {
        self.0[metric.index()] = weight;
        self
    }
}

/// Per-metric distance values plus the aggregated weighted total.
#[derive(Clone, Debug, Default)]
pub struct CostBreakdown {
    subcosts: BTreeMap<Metric, f64>,
    pub total: f64,
}

impl CostBreakdown {
    pub fn subcost(&self, metric: Metric) -> Option<f64> {
        self.subcosts.get(&metric).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        self.subcosts.iter().map(|(m, v)| (*m, *v))
    }

    /// Elementwise accumulation, for summing per-thread breakdowns.
    pub fn merge(&mut self, other: &CostBreakdown) {
        for (metric, value) in other.iter() {
            *self.subcosts.entry(metric).or_insert(0.0) += value;
        }
        self.total += other.total;
    }
}

/// Compares two [MicroarchProfile]s and produces a weighted scalar cost
/// with a per-metric breakdown.
#[derive(Debug)]
pub struct DistanceCostEngine {
    weights: CostWeights,
}

impl DistanceCostEngine {
    pub fn new(weights: CostWeights) -> Self {
        Self { weights }
    }

    /// Score one candidate thread against its reference.
    ///
    /// Every subcost is an Earth Mover's Distance over jointly normalized
    /// samples. A NaN subcost (empty or degenerate distribution) is logged
    /// and contributes zero, so one noisy metric never aborts a search
    /// iteration.
    pub fn cost(
        &self,
        reference: &MicroarchProfile,
        candidate: &MicroarchProfile,
    ) -> Result<CostBreakdown>
    {
        let mut subcosts = BTreeMap::new();
        for metric in Metric::SCALAR {
            subcosts.insert(metric, scalar_subcost(
                scalar_series(reference, metric),
                scalar_series(candidate, metric),
            ));
        }

        let (mrc, ipc) = match (&reference.curves, &candidate.curves) {
            (Some(r), Some(c)) => (
                curve_subcost(&r.mrc, &c.mrc)?,
                curve_subcost(&r.ipc, &c.ipc)?,
            ),
            (None, None) => (f64::NAN, f64::NAN),
            _ => {
                log::warn!(
                    "curve data present in only one profile; \
                     curve subcosts are degenerate"
                );
                (f64::NAN, f64::NAN)
            }
        };
        subcosts.insert(Metric::Mrc, mrc);
        subcosts.insert(Metric::Ipc, ipc);

        let mut total = 0.0;
        for (metric, subcost) in &subcosts {
            if subcost.is_nan() {
                log::warn!("NaN subcost for {}; contributing zero",
                    metric.name());
            } else {
                total += self.weights.get(*metric) * subcost;
            }
        }
        Ok(CostBreakdown { subcosts, total })
    }

    /// Score correspondingly-ordered thread lists and sum their breakdowns
    /// elementwise. Per-thread breakdowns are retained for diagnostics.
    ///
    /// The capture order of reference and candidate threads must match;
    /// that invariant is enforced by whoever produced the profiles.
    pub fn cost_threads(
        &self,
        reference: &[MicroarchProfile],
        candidate: &[MicroarchProfile],
    ) -> Result<(CostBreakdown, Vec<CostBreakdown>)>
    {
        if reference.len() != candidate.len() {
            return Err(Error::Configuration(format!(
                "reference has {} profiled threads, candidate has {}",
                reference.len(), candidate.len()
            )));
        }
        let mut aggregate = CostBreakdown::default();
        let mut per_thread = Vec::with_capacity(reference.len());
        for (r, c) in reference.iter().zip(candidate) {
            let breakdown = self.cost(r, c)?;
            aggregate.merge(&breakdown);
            per_thread.push(breakdown);
        }
        Ok((aggregate, per_thread))
    }
}

fn scalar_series(profile: &MicroarchProfile, metric: Metric) -> &[f64] {
    match metric {
        Metric::Ci => &profile.ci,
        Metric::L1iMpki => &profile.l1i_mpki,
        Metric::L1dMpki => &profile.l1d_mpki,
        Metric::L2Mpki => &profile.l2_mpki,
        Metric::BrMpki => &profile.br_mpki,
        Metric::ItlbMpki => &profile.itlb_mpki,
        Metric::DtlbMpki => &profile.dtlb_mpki,
        Metric::LocMembw => &profile.loc_membw,
        Metric::Mrc | Metric::Ipc => unreachable!("not a scalar series"),
    }
}

fn scalar_subcost(reference: &[f64], candidate: &[f64]) -> f64 {
    let (r, c) = normalize_samples(reference, candidate);
    wasserstein_distance(&r, &c)
}

/// Per-way EMD between two curve matrices, averaged across the 12 ways.
fn curve_subcost(reference: &CurveMatrix, candidate: &CurveMatrix) -> Result<f64> {
    if reference.num_ways() != CURVE_WAYS
        || candidate.num_ways() != CURVE_WAYS
    {
        return Err(Error::Configuration(format!(
            "curve matrices must have exactly {} ways (got {} and {})",
            CURVE_WAYS, reference.num_ways(), candidate.num_ways()
        )));
    }
    let mut cost = 0.0;
    for w in 0..CURVE_WAYS {
        cost += scalar_subcost(&reference.way(w), &candidate.way(w));
    }
    Ok(cost / CURVE_WAYS as f64)
}

/// Simplified cost for searches targeting a single scalar hardware metric
/// instead of a full reference profile: the absolute difference between
/// the target value and the measured run average. The two target kinds are
/// mutually exclusive per run; no normalization or EMD is involved.
#[derive(Clone, Copy, Debug)]
pub enum BlackBoxTarget {
    AvgIpc(f64),
    AvgMtpki(f64),
}

impl BlackBoxTarget {
    pub fn cost(&self, measured: &RunAverages) -> Result<f64> {
        match self {
            Self::AvgIpc(target) => Ok((target - measured.avg_ipc).abs()),
            Self::AvgMtpki(target) => {
                let mtpki = measured.avg_mtpki.ok_or_else(|| {
                    Error::Configuration(
                        "memory-traffic target requires an RDT capture"
                            .to_string()
                    )
                })?;
                Ok((target - mtpki).abs())
            }
        }
    }

    /// The measured value this target compares against.
    pub fn measured(&self, avgs: &RunAverages) -> Option<f64> {
        match self {
            Self::AvgIpc(_) => Some(avgs.avg_ipc),
            Self::AvgMtpki(_) => avgs.avg_mtpki,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AvgIpc(_) => "avg_ipc",
            Self::AvgMtpki(_) => "avg_mtpki",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::stats::{ normalize_samples, wasserstein_distance };
    use rand::prelude::*;

    fn series(rng: &mut StdRng, len: usize, lo: f64, hi: f64) -> Vec<f64> {
        (0..len).map(|_| rng.gen_range(lo..hi)).collect()
    }

    fn profile(seed: u64, curves: bool) -> MicroarchProfile {
        let mut rng = StdRng::seed_from_u64(seed);
        let curves = curves.then(|| {
            let text = |rng: &mut StdRng| {
                (0..20).map(|_| {
                    (0..CURVE_WAYS).map(|_| {
                        format!("{}", rng.gen_range(0.0..1.0f64))
                    }).collect::<Vec<_>>().join(" ")
                }).collect::<Vec<_>>().join("\n")
            };
            let mrc = CurveMatrix::parse(&text(&mut rng)).unwrap();
            let ipc = CurveMatrix::parse(&text(&mut rng)).unwrap();
            crate::profile::CurveSet {
                mrc_stats: crate::profile::CurveStats {
                    means: mrc.way_means(),
                    maxs: mrc.way_maxs(),
                    mins: mrc.way_mins(),
                },
                ipc_stats: crate::profile::CurveStats {
                    means: ipc.way_means(),
                    maxs: ipc.way_maxs(),
                    mins: ipc.way_mins(),
                },
                mrc,
                ipc,
            }
        });
        MicroarchProfile {
            ci: series(&mut rng, 50, 0.0, 1.0),
            ipc_dist: series(&mut rng, 49, 0.0, 4.0),
            br_mpki: series(&mut rng, 50, 0.0, 30.0),
            l1i_mpki: series(&mut rng, 25, 0.0, 20.0),
            l1d_mpki: series(&mut rng, 25, 0.0, 40.0),
            l2_mpki: series(&mut rng, 25, 0.0, 15.0),
            itlb_mpki: series(&mut rng, 25, 0.0, 5.0),
            dtlb_mpki: series(&mut rng, 25, 0.0, 8.0),
            loc_membw: series(&mut rng, 50, 0.0, 1e9),
            avg_ipc: 1.5,
            avg_ci: 0.8,
            curves,
        }
    }

    #[test]
    fn cost_of_a_profile_against_itself_is_zero() {
        let p = profile(11, true);
        let engine = DistanceCostEngine::new(CostWeights::default());
        let breakdown = engine.cost(&p, &p).unwrap();
        assert_eq!(breakdown.total, 0.0);
        for metric in Metric::ALL {
            assert_eq!(breakdown.subcost(metric), Some(0.0), "{:?}", metric);
        }
    }

    #[test]
    fn every_subcost_is_symmetric() {
        let a = profile(1, true);
        let b = profile(2, true);
        let engine = DistanceCostEngine::new(CostWeights::default());
        let ab = engine.cost(&a, &b).unwrap();
        let ba = engine.cost(&b, &a).unwrap();
        for metric in Metric::ALL {
            let d1 = ab.subcost(metric).unwrap();
            let d2 = ba.subcost(metric).unwrap();
            assert!((d1 - d2).abs() < 1e-12, "{:?}: {} vs {}", metric, d1, d2);
            assert!(d1 > 0.0, "{:?}", metric);
        }
        assert!((ab.total - ba.total).abs() < 1e-12);
    }

    #[test]
    fn curve_cost_is_the_mean_of_per_way_distances() {
        let a = profile(3, true);
        let b = profile(4, true);
        let engine = DistanceCostEngine::new(CostWeights::default());
        let breakdown = engine.cost(&a, &b).unwrap();

        let (amrc, bmrc) = (
            &a.curves.as_ref().unwrap().mrc,
            &b.curves.as_ref().unwrap().mrc,
        );
        let mut expected = 0.0;
        for w in 0..CURVE_WAYS {
            let (r, c) = normalize_samples(&amrc.way(w), &bmrc.way(w));
            expected += wasserstein_distance(&r, &c);
        }
        expected /= CURVE_WAYS as f64;
        let got = breakdown.subcost(Metric::Mrc).unwrap();
        assert!((got - expected).abs() < 1e-12);
    }

    #[test]
    fn nan_subcosts_contribute_zero_instead_of_failing() {
        let mut a = profile(5, false);
        let mut b = profile(6, false);
        // No RDT capture on either side: empty bandwidth distributions.
        a.loc_membw.clear();
        b.loc_membw.clear();
        let engine = DistanceCostEngine::new(CostWeights::default());
        let breakdown = engine.cost(&a, &b).unwrap();

        assert!(breakdown.subcost(Metric::LocMembw).unwrap().is_nan());
        assert!(breakdown.subcost(Metric::Mrc).unwrap().is_nan());
        assert!(breakdown.total.is_finite());

        let finite_sum: f64 = breakdown.iter()
            .filter(|(_, v)| !v.is_nan())
            .map(|(_, v)| v)
            .sum();
        assert!((breakdown.total - finite_sum).abs() < 1e-12);
    }

    #[test]
    fn weights_scale_their_metric_only() {
        let a = profile(7, false);
        let b = profile(8, false);
        let base = DistanceCostEngine::new(CostWeights::default())
            .cost(&a, &b).unwrap();
        let weighted = DistanceCostEngine::new(
            CostWeights::default().set(Metric::Ci, 3.0)
        ).cost(&a, &b).unwrap();

        let ci = base.subcost(Metric::Ci).unwrap();
        assert!((weighted.total - (base.total + 2.0 * ci)).abs() < 1e-12);
        assert_eq!(
            weighted.subcost(Metric::Ci),
            base.subcost(Metric::Ci)
        );
    }

    #[test]
    fn way_count_mismatch_is_fatal() {
        let a = profile(9, true);
        let mut b = profile(10, true);
        let narrow = CurveMatrix::parse("0.1 0.2 0.3\n0.4 0.5 0.6").unwrap();
        b.curves.as_mut().unwrap().mrc = narrow;
        let engine = DistanceCostEngine::new(CostWeights::default());
        let err = engine.cost(&a, &b).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn thread_breakdowns_sum_elementwise() {
        let refs = vec![profile(20, false), profile(21, false)];
        let cands = vec![profile(22, false), profile(23, false)];
        let engine = DistanceCostEngine::new(CostWeights::default());
        let (aggregate, per_thread) =
            engine.cost_threads(&refs, &cands).unwrap();

        assert_eq!(per_thread.len(), 2);
        let expected =
            per_thread[0].subcost(Metric::Ci).unwrap()
            + per_thread[1].subcost(Metric::Ci).unwrap();
        assert!((aggregate.subcost(Metric::Ci).unwrap() - expected).abs()
            < 1e-12);
        assert!((aggregate.total
            - (per_thread[0].total + per_thread[1].total)).abs() < 1e-12);
    }

    #[test]
    fn mismatched_thread_lists_are_fatal() {
        let engine = DistanceCostEngine::new(CostWeights::default());
        let err = engine.cost_threads(
            &[profile(30, false)],
            &[],
        ).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn black_box_cost_is_an_absolute_difference() {
        let avgs = RunAverages { avg_ipc: 1.25, avg_mtpki: Some(4.5) };
        assert_eq!(
            BlackBoxTarget::AvgIpc(2.0).cost(&avgs).unwrap(), 0.75
        );
        assert_eq!(
            BlackBoxTarget::AvgMtpki(3.0).cost(&avgs).unwrap(), 1.5
        );
    }

    #[test]
    fn mtpki_target_without_rdt_is_a_configuration_error() {
        let avgs = RunAverages { avg_ipc: 1.0, avg_mtpki: None };
        let err = BlackBoxTarget::AvgMtpki(3.0).cost(&avgs).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
