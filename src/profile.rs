//! Reduction of a canonical phase table into named metric distributions.

use crate::demux::PhaseTable;
use crate::events::Microarch;
use crate::stats::{ filter_missing, truncate_and_add, CurveMatrix };
use crate::{ Error, Result };

/// Per-way aggregates of one cache curve, across phases.
#[derive(Clone, Debug)]
pub struct CurveStats {
    pub means: Vec<f64>,
    pub maxs: Vec<f64>,
    pub mins: Vec<f64>,
}

impl CurveStats {
    fn of(m: &CurveMatrix) -> Self {
        Self {
            means: m.way_means(),
            maxs: m.way_maxs(),
            mins: m.way_mins(),
        }
    }
}

/// Curve data attached to a profile: the raw matrices (the cost engine
/// compares per-way column slices) plus their per-way aggregates.
#[derive(Clone, Debug)]
pub struct CurveSet {
    pub mrc: CurveMatrix,
    pub ipc: CurveMatrix,
    pub mrc_stats: CurveStats,
    pub ipc_stats: CurveStats,
}

/// Named metric distributions derived from one profiled thread.
///
/// Scalar series are per-phase samples with each series' own missing
/// phases already dropped, so their lengths differ; the cost engine
/// treats each as an empirical distribution, not as aligned vectors.
#[derive(Clone, Debug)]
pub struct MicroarchProfile {
    /// Fraction of reference cycles the core spent unhalted, per phase.
    pub ci: Vec<f64>,
    /// Instructions per unhalted clock, per phase (phase 0 dropped).
    pub ipc_dist: Vec<f64>,
    pub br_mpki: Vec<f64>,
    pub l1i_mpki: Vec<f64>,
    pub l1d_mpki: Vec<f64>,
    pub l2_mpki: Vec<f64>,
    pub itlb_mpki: Vec<f64>,
    pub dtlb_mpki: Vec<f64>,
    /// Local memory bandwidth per phase, bytes/second-equivalent. Empty
    /// when the capture carried no RDT counters.
    pub loc_membw: Vec<f64>,
    /// Run-level instructions per clock.
    pub avg_ipc: f64,
    /// Run-level compute intensity, first phase dropped as unreliable.
    pub avg_ci: f64,
    pub curves: Option<CurveSet>,
}

impl MicroarchProfile {
    /// Derive the metric distributions for one thread.
    ///
    /// `curves` are the miss-rate and IPC curve matrices from the curve
    /// sweep, when one ran; an empty matrix means no sweep, and curve
    /// statistics are omitted entirely.
    pub fn from_table(
        table: &PhaseTable,
        curves: Option<(CurveMatrix, CurveMatrix)>,
        arch: Microarch,
        tsc_freq_mhz: u64,
    ) -> Result<Self>
    {
        let mapping = arch.mapping();

        let unhalted = dense_series(table, "UNHALTED_REFERENCE_CYCLES")?;
        let inst = dense_series(table, "INST_RETIRED")?;
        let clk = dense_series(table, "CPU_CLK_UNHALTED")?;
        let ref_cycles = table.ref_cycles();

        let ci: Vec<f64> = unhalted.iter().zip(&ref_cycles)
            .map(|(u, rc)| u / rc)
            .collect();
        let avg_ipc = inst.iter().sum::<f64>() / clk.iter().sum::<f64>();
        // The first phase's reading spans process startup; drop it from
        // run-level averages and the IPC distribution.
        let avg_ci = unhalted.iter().skip(1).sum::<f64>()
            / ref_cycles.iter().skip(1).sum::<f64>();
        let ipc_dist: Vec<f64> = inst.iter().zip(&clk).skip(1)
            .map(|(i, c)| i / c)
            .collect();

        let loc_membw: Vec<f64> = table.records().iter()
            .filter_map(|r| r.local_mem_traffic.map(|lmt| {
                lmt * tsc_freq_mhz as f64 * 1e6 / r.ref_cycles
            }))
            .collect();

        let curves = match curves {
            Some((mrc, ipc)) if !mrc.is_empty() && !ipc.is_empty() => {
                Some(CurveSet {
                    mrc_stats: CurveStats::of(&mrc),
                    ipc_stats: CurveStats::of(&ipc),
                    mrc,
                    ipc,
                })
            }
            _ => {
                log::info!("no curve matrices; skipping curve statistics");
                None
            }
        };

        Ok(Self {
            ci,
            ipc_dist,
            br_mpki: mpki_series(table, &inst, mapping.br_misses)?,
            l1i_mpki: mpki_series(table, &inst, mapping.l1i_misses)?,
            l1d_mpki: mpki_series(table, &inst, mapping.l1d_misses)?,
            l2_mpki: mpki_series(table, &inst, mapping.l2_misses)?,
            itlb_mpki: mpki_series(table, &inst, mapping.itlb_misses)?,
            dtlb_mpki: mpki_series(table, &inst, mapping.dtlb_misses)?,
            loc_membw,
            avg_ipc,
            avg_ci,
            curves,
        })
    }
}

/// Misses per kilo-instruction for one metric.
///
/// Each component event yields its own series, filtered for the phases
/// where that event's group was active; component series from different
/// groups are not aligned, so they are truncated to the shortest length
/// before the elementwise sum.
fn mpki_series(
    table: &PhaseTable,
    inst: &[f64],
    components: &[&str],
) -> Result<Vec<f64>>
{
    let mut acc: Option<Vec<f64>> = None;
    for name in components {
        let series = table.event_series(name).ok_or_else(|| {
            Error::Configuration(format!(
                "counter {} not present in this capture \
                 (profiled with a different architecture mapping?)",
                name
            ))
        })?;
        let component: Vec<f64> = series.iter().zip(inst)
            .filter_map(|(ev, i)| ev.map(|ev| 1000.0 * ev / i))
            .collect();
        acc = Some(match acc {
            None => component,
            Some(prev) => truncate_and_add(&prev, &component),
        });
    }
    Ok(acc.unwrap_or_default())
}

/// A column that the canonical format populates in every row.
fn dense_series(table: &PhaseTable, name: &str) -> Result<Vec<f64>> {
    let series = table.event_series(name).ok_or_else(|| {
        Error::Configuration(format!("table has no {} column", name))
    })?;
    let dense = filter_missing(&series);
    if dense.len() != series.len() {
        return Err(Error::DataCorruption(format!(
            "fixed-function column {} has missing phases", name
        )));
    }
    Ok(dense)
}

/// Run-level scalar averages for the black-box cost variant.
#[derive(Clone, Copy, Debug)]
pub struct RunAverages {
    /// Instructions per unhalted clock over the whole run.
    pub avg_ipc: f64,
    /// Memory traffic (64-byte lines) per kilo-instruction, first phase
    /// dropped. Absent when the capture carried no RDT counters.
    pub avg_mtpki: Option<f64>,
}

impl RunAverages {
    pub fn from_table(table: &PhaseTable) -> Result<Self> {
        let inst = dense_series(table, "INST_RETIRED")?;
        let clk = dense_series(table, "CPU_CLK_UNHALTED")?;
        let avg_ipc = inst.iter().sum::<f64>() / clk.iter().sum::<f64>();

        let avg_mtpki = if table.has_rdt() {
            let traffic: f64 = table.records().iter().skip(1)
                .filter_map(|r| r.local_mem_traffic)
                .sum();
            let kilo_inst = 64.0 * inst.iter().skip(1).sum::<f64>();
            Some(1000.0 * traffic / kilo_inst)
        } else {
            None
        };
        Ok(Self { avg_ipc, avg_mtpki })
    }
}
