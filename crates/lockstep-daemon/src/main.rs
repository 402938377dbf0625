//! Lockstep daemon entry point.
//!
//! Loads a run configuration, wires the demo task stack onto it, and
//! drives a complete run with signal handling and a final report.

mod demo;
mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use lockstep_common::config::SimConfig;
use lockstep_runtime::harness::{Harness, HarnessOptions};
use lockstep_runtime::SharedFlag;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::signals::SignalHandler;

/// Lockstep daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "lockstep-daemon",
    about = "Lockstep daemon - multi-rate deterministic simulation runner",
    version,
    long_about = None
)]
struct Args {
    /// Path to a run configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Simulation horizon (overrides config file), e.g. "500ms", "2s".
    #[arg(long, value_parser = humantime::parse_duration)]
    horizon: Option<Duration>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting lockstep daemon");

    let mut config = load_config(&args)?;
    if let Some(horizon) = args.horizon {
        config.horizon = horizon;
    }
    config
        .validate()
        .context("Configuration failed validation")?;

    if args.print_config {
        println!("{}", config.to_toml().context("Failed to render config")?);
        return Ok(());
    }

    info!(
        horizon = %humantime::format_duration(config.horizon),
        tasks = config.tasks.len(),
        "Configuration loaded"
    );

    run_daemon(&config)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "lockstep_daemon={},lockstep_runtime={},lockstep_common={}",
        level, level, level
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `LOCKSTEP_CONFIG_PATH` environment variable
/// 3. `config/default.toml` (local development)
/// 4. Built-in defaults
fn load_config(args: &Args) -> Result<SimConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return SimConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path));
    }

    if let Ok(env_path) = std::env::var("LOCKSTEP_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from LOCKSTEP_CONFIG_PATH");
            return SimConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from LOCKSTEP_CONFIG_PATH={:?}", env_path)
            });
        }
        warn!(
            path = %env_path,
            "LOCKSTEP_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    let local_path = PathBuf::from("config/default.toml");
    if local_path.exists() {
        info!(?local_path, "Loading config from local path");
        return SimConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {:?}", local_path));
    }

    info!("No config file found, using built-in defaults");
    Ok(SimConfig::default())
}

/// Run one complete simulation.
fn run_daemon(config: &SimConfig) -> Result<()> {
    let set = demo::build(config).context("Failed to build demo task stack")?;

    let stop = Arc::new(SharedFlag::new());
    let signal_handler =
        SignalHandler::new(Arc::clone(&stop)).context("Failed to set up signal handlers")?;

    let mut options = HarnessOptions::from_config(config);
    options.stop = Some(stop);

    let report = Harness::new(set, options)
        .run()
        .context("Run ended with a fault")?;

    for task in &report.tasks {
        info!(
            task = %task.id,
            frequency_hz = task.frequency_hz,
            cycles = task.dispatches,
            "Task totals"
        );
    }

    if signal_handler.shutdown_requested() {
        info!(
            signal = ?signal_handler.state().last_signal(),
            "Run ended by shutdown request"
        );
    }

    let metrics_json =
        serde_json::to_string(&report.metrics).context("Failed to render metrics")?;
    info!(
        elapsed = %humantime::format_duration(report.elapsed),
        final_tick = report.final_tick,
        sim_time = %humantime::format_duration(report.sim_time),
        final_state = %report.state,
        signals = signal_handler.state().signal_count(),
        metrics = %metrics_json,
        "Daemon shutdown complete"
    );

    Ok(())
}
