use std::path::PathBuf;

use clap::Parser;

use counterpart::demux::PhaseTable;
use counterpart::harness::demux_raw_log;
use counterpart::profile::RunAverages;

/// Reduce raw grouped-counters logs to canonical counter CSVs.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Raw logs to convert (output lands next to each, with .csv appended)
    #[arg(required = true)]
    logs: Vec<PathBuf>,

    /// The capture carried no RDT counters
    #[arg(long)]
    no_rdt: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    for log in &args.logs {
        let out = demux_raw_log(log, !args.no_rdt)?;
        let table = PhaseTable::read_csv(&out)?;
        let avgs = RunAverages::from_table(&table)?;
        println!("[*] {}: {} phases, avg ipc {:.4}",
            out.display(), table.len(), avgs.avg_ipc);
        if let Some(mtpki) = avgs.avg_mtpki {
            println!("[*] avg memory traffic = {:.4} lines/kinst", mtpki);
        }
    }
    Ok(())
}
