use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use hymsim::sim::config::{RootKind, SimulatorConfig};
use hymsim::sim::log::init_logger;
use hymsim::sim::top::Simulator;

#[derive(Parser)]
#[command(version, about)]
struct HymsimArgs {
    #[arg(help="Path to config.toml")]
    config_path: PathBuf,
    #[arg(long, help="Replay this request trace instead of the synthetic pattern")]
    trace: Option<PathBuf>,
    #[arg(long, help="Override number of requests to send")]
    requests: Option<u64>,
    #[arg(long, help="Device the traffic is sent to (cache, memory, staller)")]
    root: Option<RootKind>,
    #[arg(long, help="Bypass the DRAM cache and drive the PCM directly")]
    no_cache: bool,
    #[arg(long, help="Enable log at level (0:warn, 1:info, 2:debug)")]
    log: Option<u64>,
    #[arg(long, help="Write periodic statistics to this file as JSON lines")]
    stats_out: Option<PathBuf>,
    #[arg(long, help="Override statistics period in cycles")]
    stats_period: Option<u64>,
}

pub fn main() -> anyhow::Result<()> {
    let argv = HymsimArgs::parse();
    let text = fs::read_to_string(&argv.config_path)
        .with_context(|| format!("failed to read config file {}", argv.config_path.display()))?;
    let mut config = SimulatorConfig::from_toml_str(&text)?;

    // override toml configs with argv
    config.sim.log_level = argv.log.unwrap_or(config.sim.log_level);
    config.sim.root = argv.root.unwrap_or(config.sim.root);
    if argv.no_cache {
        config.sim.root = RootKind::Memory;
    }
    config.traffic.num_requests = argv.requests.unwrap_or(config.traffic.num_requests);
    if argv.trace.is_some() {
        config.traffic.file = argv.trace;
    }
    if argv.stats_out.is_some() {
        config.engine.stats_file = argv.stats_out;
    }
    config.engine.stats_period = argv.stats_period.unwrap_or(config.engine.stats_period);

    init_logger(config.sim.log_level);

    let mut sim = Simulator::from_config(config)?;
    let report = sim.run();
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.finished {
        anyhow::bail!("simulation ended before every request completed");
    }
    Ok(())
}
