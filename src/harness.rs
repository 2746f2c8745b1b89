//! One optimizer iteration's batch pass: demultiplex the raw logs an
//! external profiler left behind, derive per-thread profiles, and score
//! them against the reference.
//!
//! The pass is single-threaded and synchronous, and only starts once the
//! external profiler has signalled completion (process exit, or a sentinel
//! via [crate::util::wait_for_sentinel]). Each iteration's raw and
//! canonical files live under a private per-iteration directory supplied
//! by the caller.

pub mod config;
pub use config::*;

use std::path::{ Path, PathBuf };

use crate::cost::{ CostBreakdown, DistanceCostEngine };
use crate::demux::{ Demultiplexer, PhaseTable };
use crate::events::Microarch;
use crate::profile::{ MicroarchProfile, RunAverages };
use crate::schema::RawLog;
use crate::util::{
    discover_profile_dir,
    load_curve_matrix,
    TargetConfigs,
    ThreadCapture,
};
use crate::{ Error, Result };

/// The scored outcome of one iteration against a reference profile.
#[derive(Clone, Debug)]
pub struct IterationCost {
    /// The scalar handed back to the optimizer (lower is better).
    pub total: f64,
    /// Subcosts summed elementwise across threads.
    pub aggregate: CostBreakdown,
    /// Per-thread breakdowns, in capture order, for diagnostics.
    pub per_thread: Vec<CostBreakdown>,
}

/// The scored outcome of one black-box iteration.
#[derive(Clone, Debug)]
pub struct BlackBoxCost {
    pub total: f64,
    pub per_thread: Vec<ThreadAverage>,
}

/// One thread's measured run average and its distance from the target.
#[derive(Clone, Copy, Debug)]
pub struct ThreadAverage {
    pub tid: u32,
    pub measured: f64,
    pub cost: f64,
}

/// Scores candidate profile directories, one per optimizer iteration.
#[derive(Debug)]
pub struct CostHarness {
    cfg: HarnessConfig,
    engine: DistanceCostEngine,
    reference: Vec<MicroarchProfile>,
}

impl CostHarness {
    /// Set up against a reference profile directory. The reference's
    /// target-configs record supplies the TSC frequency its bandwidth
    /// metrics were captured at; it is read once, here.
    pub fn with_reference(
        cfg: HarnessConfig,
        reference_dir: &Path,
    ) -> Result<Self>
    {
        let target_cfg = TargetConfigs::read(reference_dir)?;
        log::info!(
            "target TSC frequency = {}MHz", target_cfg.tsc_freq_mhz
        );
        let reference = load_profiles(
            reference_dir, cfg.arch, target_cfg.tsc_freq_mhz,
            cfg.skip_curves,
        )?;
        log::info!(
            "loaded {} reference thread profile(s) from {}",
            reference.len(), reference_dir.display()
        );
        Ok(Self {
            engine: DistanceCostEngine::new(cfg.weights),
            cfg,
            reference,
        })
    }

    /// Set up for a black-box search; no reference profile is read.
    pub fn black_box(cfg: HarnessConfig) -> Result<Self> {
        if cfg.black_box.is_none() {
            return Err(Error::Configuration(
                "black-box harness requires a black-box target".to_string()
            ));
        }
        Ok(Self {
            engine: DistanceCostEngine::new(cfg.weights),
            cfg,
            reference: Vec::new(),
        })
    }

    /// Score a candidate directory and return exactly the one scalar the
    /// external optimizer consumes.
    pub fn evaluate_cost(&self, candidate_dir: &Path) -> Result<f64> {
        match self.cfg.black_box {
            Some(_) => Ok(self.evaluate_black_box(candidate_dir)?.total),
            None => Ok(self.evaluate(candidate_dir)?.total),
        }
    }

    /// Score a candidate directory against the reference profiles.
    pub fn evaluate(&self, candidate_dir: &Path) -> Result<IterationCost> {
        if self.cfg.black_box.is_some() {
            return Err(Error::Configuration(
                "harness is configured for black-box costs".to_string()
            ));
        }
        let candidate = load_profiles(
            candidate_dir, self.cfg.arch, self.cfg.tsc_freq_mhz,
            self.cfg.skip_curves,
        )?;
        let (aggregate, per_thread) =
            self.engine.cost_threads(&self.reference, &candidate)?;

        for (metric, value) in aggregate.iter() {
            log::info!("subcost {} = {:.4}", metric.name(), value);
        }
        log::info!("total cost = {}", aggregate.total);
        Ok(IterationCost {
            total: aggregate.total,
            aggregate,
            per_thread,
        })
    }

    /// Score a candidate directory against the scalar black-box target.
    pub fn evaluate_black_box(
        &self,
        candidate_dir: &Path,
    ) -> Result<BlackBoxCost>
    {
        let target = self.cfg.black_box.ok_or_else(|| {
            Error::Configuration(
                "harness has no black-box target".to_string()
            )
        })?;

        let mut per_thread = Vec::new();
        let mut total = 0.0;
        for capture in discover_profile_dir(candidate_dir)? {
            let table = PhaseTable::read_csv(&capture.counters)?;
            let avgs = RunAverages::from_table(&table)?;
            let cost = target.cost(&avgs)?;
            let measured = target.measured(&avgs).unwrap_or(f64::NAN);
            log::info!(
                "tid {}: measured {} = {:.4}, cost {:.4}",
                capture.tid, target.name(), measured, cost
            );
            per_thread.push(ThreadAverage {
                tid: capture.tid,
                measured,
                cost,
            });
            total += cost;
        }
        log::info!("total cost = {}", total);
        Ok(BlackBoxCost { total, per_thread })
    }
}

/// Load every thread profile in a directory, in capture order.
pub fn load_profiles(
    dir: &Path,
    arch: Microarch,
    tsc_freq_mhz: u64,
    skip_curves: bool,
) -> Result<Vec<MicroarchProfile>>
{
    discover_profile_dir(dir)?.iter()
        .map(|capture| {
            load_thread_profile(capture, arch, tsc_freq_mhz, skip_curves)
        })
        .collect()
}

fn load_thread_profile(
    capture: &ThreadCapture,
    arch: Microarch,
    tsc_freq_mhz: u64,
    skip_curves: bool,
) -> Result<MicroarchProfile>
{
    let table = PhaseTable::read_csv(&capture.counters)?;
    let curves = match (&capture.curves, skip_curves) {
        (Some((mrc, ipc)), false) => Some((
            load_curve_matrix(mrc)?,
            load_curve_matrix(ipc)?,
        )),
        _ => None,
    };
    MicroarchProfile::from_table(&table, curves, arch, tsc_freq_mhz)
}

/// Reduce one raw profiler log to its canonical CSV, written next to the
/// input with a `.csv` suffix appended. Returns the output path.
pub fn demux_raw_log(path: &Path, rdt: bool) -> Result<PathBuf> {
    let log = RawLog::read(path, rdt)?;
    let table = Demultiplexer::new().demux(&log)?;

    let mut out = path.as_os_str().to_owned();
    out.push(".csv");
    let out = PathBuf::from(out);
    table.write_csv(&out)?;
    log::info!(
        "{}: {} phases over {} groups -> {}",
        path.display(), table.len(), log.schema.num_groups(), out.display()
    );
    Ok(out)
}

/// Demultiplex every raw grouped-counters log in an iteration directory.
pub fn demux_dir(dir: &Path, rdt: bool) -> Result<Vec<PathBuf>> {
    let mut raw_logs: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.contains("_grouped_counters_") && !name.ends_with(".csv") {
            raw_logs.push(entry.path());
        }
    }
    raw_logs.sort();
    raw_logs.iter().map(|p| demux_raw_log(p, rdt)).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cost::{ BlackBoxTarget, Metric };
    use crate::util::TargetConfigs;

    const TSC_MHZ: u64 = 2000;

    /// A one-group raw log covering the legacy mapping's full event set,
    /// with RDT extras. `scale` perturbs the per-phase event counts.
    fn raw_log(scale: u64) -> String {
        let mut text = String::from(
            "group 0 UNHALTED_REFERENCE_CYCLES INST_RETIRED \
             CPU_CLK_UNHALTED BR_MISP_RETIRED FRONTEND_RETIRED.L1I_MISS \
             MEM_LOAD_UOPS_RETIRED.L1_MISS MEM_LOAD_UOPS_RETIRED.L2_MISS \
             FRONTEND_RETIRED.ITLB_MISS DTLB-LOADS\n"
        );
        for phase in 1..=4u64 {
            let t = phase * 1000;
            let cum = phase * phase * scale;
            text.push_str(&format!(
                "0 0 100 {t} {tsc} {te} {tr} {lmt} {occ} \
                 {u} {i} {c} {e1} {e2} {e3} {e4} {e5} {e6}\n",
                t = t,
                tsc = phase * 100_000,
                te = phase * 500,
                tr = phase * 500,
                lmt = phase * 64 * scale,
                occ = phase * 32,
                u = cum * 50,
                i = cum * 100,
                c = cum * 60,
                e1 = cum,
                e2 = cum * 2,
                e3 = cum * 3,
                e4 = cum * 4,
                e5 = cum * 5,
                e6 = cum * 6,
            ));
        }
        text
    }

    fn curve_file(base: f64) -> String {
        (0..5).map(|phase| {
            (0..12).map(|way| {
                format!("{}", base + 0.05 * phase as f64 + 0.01 * way as f64)
            }).collect::<Vec<_>>().join(" ")
        }).collect::<Vec<_>>().join("\n")
    }

    /// Write a complete profile directory: one raw log per thread (then
    /// demultiplexed), curve files, and a target-configs record.
    fn threads_dir(
        tag: &str,
        threads: &[(u32, u64)],
        curve_base: f64,
    ) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "counterpart-harness-{}-{}", tag, std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        for (tid, scale) in threads {
            std::fs::write(
                dir.join(format!("0_grouped_counters_{}", tid)),
                raw_log(*scale),
            ).unwrap();
            std::fs::write(
                dir.join(format!("0_mrc_{}", tid)), curve_file(curve_base)
            ).unwrap();
            std::fs::write(
                dir.join(format!("0_ipc_{}", tid)),
                curve_file(curve_base + 1.0),
            ).unwrap();
        }
        TargetConfigs { tsc_freq_mhz: TSC_MHZ }.write(&dir).unwrap();

        let csvs = demux_dir(&dir, true).unwrap();
        assert_eq!(csvs.len(), threads.len());
        dir
    }

    fn profile_dir(tag: &str, scale: u64, curve_base: f64) -> PathBuf {
        threads_dir(tag, &[(100, scale)], curve_base)
    }

    fn cfg() -> HarnessConfig {
        HarnessConfig::new(Microarch::SkylakeLegacy, TSC_MHZ)
    }

    #[test]
    fn a_profile_scores_zero_against_itself() {
        let dir = profile_dir("self", 10, 0.2);
        let harness = CostHarness::with_reference(cfg(), &dir).unwrap();
        let outcome = harness.evaluate(&dir).unwrap();
        assert_eq!(outcome.total, 0.0);
        assert_eq!(outcome.per_thread.len(), 1);
        assert_eq!(outcome.aggregate.subcost(Metric::Mrc), Some(0.0));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn different_captures_score_a_positive_cost() {
        let reference = profile_dir("ref", 10, 0.2);
        let candidate = profile_dir("cand", 17, 0.5);
        let harness = CostHarness::with_reference(cfg(), &reference).unwrap();
        let outcome = harness.evaluate(&candidate).unwrap();
        assert!(outcome.total > 0.0);
        assert!(outcome.total.is_finite());
        assert!(
            outcome.aggregate.subcost(Metric::Mrc).unwrap() > 0.0
        );
        assert_eq!(
            harness.evaluate_cost(&candidate).unwrap(), outcome.total
        );
        std::fs::remove_dir_all(&reference).unwrap();
        std::fs::remove_dir_all(&candidate).unwrap();
    }

    #[test]
    fn threads_pair_in_capture_order_and_costs_sum() {
        let reference = threads_dir("mt-ref", &[(100, 10), (200, 14)], 0.2);
        let candidate = threads_dir("mt-cand", &[(310, 10), (320, 14)], 0.2);
        let harness =
            CostHarness::with_reference(cfg(), &reference).unwrap();
        let outcome = harness.evaluate(&candidate).unwrap();

        // Thread captures pair positionally: same data, zero cost, even
        // though the tids differ.
        assert_eq!(outcome.per_thread.len(), 2);
        assert_eq!(outcome.total, 0.0);

        // A single-thread candidate cannot be scored against it.
        let short = profile_dir("mt-short", 10, 0.2);
        let err = harness.evaluate(&short).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        std::fs::remove_dir_all(&reference).unwrap();
        std::fs::remove_dir_all(&candidate).unwrap();
        std::fs::remove_dir_all(&short).unwrap();
    }

    #[test]
    fn missing_target_configs_fails_reference_load() {
        let dir = profile_dir("missingcfg", 10, 0.2);
        std::fs::remove_file(dir.join(TargetConfigs::FILENAME)).unwrap();
        let err = CostHarness::with_reference(cfg(), &dir).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn black_box_ipc_cost_is_the_distance_to_target() {
        let dir = profile_dir("bbox", 10, 0.2);
        // INST_RETIRED and CPU_CLK_UNHALTED scale identically, so the
        // run-level IPC is exactly 100/60.
        let ipc = 100.0 / 60.0;
        let harness = CostHarness::black_box(
            cfg().black_box(BlackBoxTarget::AvgIpc(ipc + 0.25))
        ).unwrap();
        let outcome = harness.evaluate_black_box(&dir).unwrap();
        assert_eq!(outcome.per_thread.len(), 1);
        assert_eq!(outcome.per_thread[0].tid, 100);
        assert!((outcome.total - 0.25).abs() < 1e-9);
        assert!((outcome.per_thread[0].measured - ipc).abs() < 1e-9);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn black_box_harness_requires_a_target() {
        let err = CostHarness::black_box(cfg()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
