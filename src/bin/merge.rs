//! Reads JSON-lines files of exported basic-flow records, one per input
//! interface, and multiplexes them onto stdout as a single stream. The
//! single-process stand-in for the original `merger` binary (see
//! `flowcap_core::merge`): `-T` selects timestamp-aware mode and `-F`
//! picks `TIME_FIRST` ordering over the default `TIME_LAST`, matching the
//! original's flags.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use flowcap_core::merge::{
    multiplex_arrival_order, multiplex_by_timestamp, ExportedFlow, TimestampSelector,
};

#[derive(Parser, Debug)]
struct Args {
    /// One JSON-lines file per input interface.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Timestamp aware mode: order the merged stream by record timestamp
    /// instead of resending records in arrival (per-file) order.
    #[arg(short = 'T', long)]
    timestamp_aware: bool,

    /// In timestamp aware mode, sort by TIME_FIRST instead of TIME_LAST.
    #[arg(short = 'F', long)]
    first_timestamp: bool,
}

fn read_flows(path: &PathBuf) -> Result<Vec<ExportedFlow>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut flows = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let flow: ExportedFlow =
            serde_json::from_str(&line).with_context(|| format!("parsing record in {}", path.display()))?;
        flows.push(flow);
    }
    Ok(flows)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let streams = args
        .inputs
        .iter()
        .map(read_flows)
        .collect::<Result<Vec<_>>>()?;

    let merged = if args.timestamp_aware {
        let selector = if args.first_timestamp { TimestampSelector::First } else { TimestampSelector::Last };
        multiplex_by_timestamp(streams, selector)
    } else {
        multiplex_arrival_order(streams)
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for flow in &merged {
        writeln!(out, "{}", serde_json::to_string(flow)?)?;
    }

    log::info!("multiplexed {} records from {} input streams", merged.len(), args.inputs.len());
    Ok(())
}
