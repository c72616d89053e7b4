//! scalesim: replay scaling decisions against a simulated cloud platform.
//!
//! # Usage
//!
//! ```text
//! scalesim validate --config platform.toml
//! scalesim run --config platform.toml --scenario scenario.toml --step 5s
//! ```
//!
//! `run` prints the final platform state as JSON on stdout; logs go to
//! stderr and are filtered by `RUST_LOG`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use scalesim_core::{PlatformConfig, parse_duration};
use scalesim_placement::StrategyRegistry;

#[derive(Parser)]
#[command(
    name = "scalesim",
    about = "Cloud platform scaling simulator",
    version,
    propagate_version = true
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a scenario and print the resulting platform state.
    Run {
        /// Platform configuration (node types, services, regions).
        #[arg(long)]
        config: PathBuf,

        /// Timed scaling decisions and faults.
        #[arg(long)]
        scenario: PathBuf,

        /// Simulation clock step, e.g. "500ms", "5s", "1m".
        #[arg(long, default_value = "1s", value_parser = parse_step)]
        step: Duration,

        /// Print compact instead of pretty JSON.
        #[arg(long)]
        compact: bool,
    },
    /// Load and validate a platform configuration.
    Validate {
        #[arg(long)]
        config: PathBuf,
    },
}

fn parse_step(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,scalesim=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Run {
            config,
            scenario,
            step,
            compact,
        } => {
            let report = scalesim::run_files(&config, &scenario, step)?;
            let json = if compact {
                serde_json::to_string(&report)?
            } else {
                serde_json::to_string_pretty(&report)?
            };
            println!("{json}");
            Ok(())
        }
        Command::Validate { config } => {
            let platform = PlatformConfig::load(&config)
                .with_context(|| format!("loading platform config {}", config.display()))?;
            StrategyRegistry::with_builtins()
                .calculator(&platform.adjustment)
                .context("resolving adjustment strategies")?;
            info!(
                node_types = platform.catalog.node_types().len(),
                services = platform.catalog.services().count(),
                regions = platform.regions.len(),
                "platform config is valid"
            );
            println!("{} is valid", config.display());
            Ok(())
        }
    }
}
