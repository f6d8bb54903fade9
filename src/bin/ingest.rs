//! Command-line driver: wires a packet source, the flow cache, the
//! registered dissectors, and an exporter sink together, then runs the
//! ingest loop until the source is exhausted or a stop signal arrives.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use flowcap_core::cache::FlowCache;
use flowcap_core::config::load_config;
use flowcap_core::dissector::http::HttpDissector;
use flowcap_core::dissector::stats::StatsDissector;
use flowcap_core::dissector::Dissector;
use flowcap_core::ingest::IngestLoop;
use flowcap_core::sink::JsonLinesSink;
use flowcap_core::source::{PcapFileSource, PcapLiveSource};

#[derive(Parser, Debug)]
struct Args {
    /// Path to a TOML config file (see `config::Config`).
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;

    std::fs::create_dir_all(&config.output.dir)
        .with_context(|| format!("creating output directory {}", config.output.dir))?;

    let mut dissectors: Vec<Box<dyn Dissector>> = Vec::new();
    for name in &config.ingest.dissectors {
        match name.as_str() {
            "http" => dissectors.push(Box::new(HttpDissector::new())),
            other => log::warn!("unknown dissector {other:?} in config, skipping"),
        }
    }

    let sink = Box::new(JsonLinesSink::new(&config.output.dir));
    let mut cache = FlowCache::new(
        config.cache.cache_size,
        config.cache.line_size,
        config.cache.active_timeout,
        config.cache.inactive_timeout,
        dissectors,
        sink,
    )?;

    if let Some(interval) = config.ingest.stats_interval {
        let stats_dissector =
            StatsDissector::new(cache.stats_handle(), std::time::Duration::from_secs_f64(interval));
        cache.push_dissector(Box::new(stats_dissector));
    }

    log::info!(
        "starting ingest: cache_size={} line_size={} sampling_probability={}",
        config.cache.cache_size,
        config.cache.line_size,
        config.ingest.sampling_probability,
    );

    if config.input.live {
        let source = PcapLiveSource::init_interface(&config.input.path, 1000)
            .with_context(|| format!("opening interface {}", config.input.path))?;
        let mut ingest = IngestLoop::new(
            source,
            cache,
            config.ingest.sampling_probability,
            config.ingest.packet_limit,
        )?;
        ingest.run()
    } else {
        let source = PcapFileSource::open_file(&config.input.path)
            .with_context(|| format!("opening capture file {}", config.input.path))?;
        let mut ingest = IngestLoop::new(
            source,
            cache,
            config.ingest.sampling_probability,
            config.ingest.packet_limit,
        )?;
        ingest.run()
    }
}
