use std::path::PathBuf;

use anyhow::bail;
use clap::Parser;

use counterpart::cost::{ BlackBoxTarget, CostWeights, Metric };
use counterpart::events::Microarch;
use counterpart::harness::{ demux_dir, CostHarness, HarnessConfig };

/// Score a candidate profile directory against a reference profile
/// (or against a scalar black-box target).
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Reference profile directory (holds the target-configs record)
    #[arg(long)]
    reference: Option<PathBuf>,

    /// Candidate profile directory to score
    #[arg(long)]
    candidate: PathBuf,

    /// Microarchitecture the profiles were captured on
    #[arg(long, value_enum, default_value_t = Microarch::Skylake)]
    arch: Microarch,

    /// TSC frequency of this machine, in MHz
    #[arg(long)]
    tsc_freq_mhz: u64,

    /// Ten comma-separated metric weights, in
    /// ci,l1i,l1d,l2,br,itlb,dtlb,membw,mrc,ipc order
    #[arg(long)]
    weights: Option<String>,

    /// Black-box mode: target average IPC
    #[arg(long, conflicts_with = "mpki_target")]
    ipc_target: Option<f64>,

    /// Black-box mode: target memory traffic per kilo-instruction
    #[arg(long)]
    mpki_target: Option<f64>,

    /// Ignore curve files even when present
    #[arg(long)]
    skip_curves: bool,

    /// Demultiplex raw logs in the candidate directory first
    #[arg(long)]
    demux: bool,

    /// The captures carried no RDT counters
    #[arg(long)]
    no_rdt: bool,
}

fn parse_weights(arg: &str) -> anyhow::Result<CostWeights> {
    let values = arg.split(',')
        .map(|w| w.trim().parse::<f64>())
        .collect::<Result<Vec<f64>, _>>()?;
    let n = Metric::ALL.len();
    if values.len() != n {
        bail!("expected {} weights, got {}", n, values.len());
    }
    let mut weights = [0.0; 10];
    weights.copy_from_slice(&values);
    Ok(CostWeights::new(weights))
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut cfg = HarnessConfig::new(args.arch, args.tsc_freq_mhz);
    if let Some(arg) = &args.weights {
        cfg = cfg.weights(parse_weights(arg)?);
    }
    if args.skip_curves {
        cfg = cfg.skip_curves();
    }
    if args.no_rdt {
        cfg = cfg.no_rdt();
    }
    if let Some(target) = args.ipc_target {
        cfg = cfg.black_box(BlackBoxTarget::AvgIpc(target));
    } else if let Some(target) = args.mpki_target {
        cfg = cfg.black_box(BlackBoxTarget::AvgMtpki(target));
    }

    if args.demux {
        demux_dir(&args.candidate, !args.no_rdt)?;
    }

    if cfg.black_box.is_some() {
        let harness = CostHarness::black_box(cfg)?;
        let outcome = harness.evaluate_black_box(&args.candidate)?;
        for thread in &outcome.per_thread {
            println!("[*] tid {}: measured {:.4}, cost {:.4}",
                thread.tid, thread.measured, thread.cost);
        }
        println!("{}", outcome.total);
        return Ok(());
    }

    let Some(reference) = &args.reference else {
        bail!("either --reference or a black-box target is required");
    };
    let harness = CostHarness::with_reference(cfg, reference)?;
    let outcome = harness.evaluate(&args.candidate)?;
    for (metric, value) in outcome.aggregate.iter() {
        println!("[*] {} = {:.4}", metric.name(), value);
    }
    println!("{}", outcome.total);
    Ok(())
}
