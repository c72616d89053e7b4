//! scalesim: replay scaling decisions against a simulated cloud platform.
//!
//! Assembles the workspace crates into one driver:
//! - Platform config (`scalesim-core`)
//! - Scenario file: timed scaling decisions and node faults ([`scenario`])
//! - Platform adjuster and delta timeline (`scalesim-autoscale`)
//! - JSON report of the final platform state ([`report`])
//!
//! ```text
//! platform.toml ─┐
//!                ├─► Simulation::run ──► SimulationReport (JSON)
//! scenario.toml ─┘      tick: faults → roll_out → decisions
//! ```

pub mod driver;
pub mod report;
pub mod scenario;

use std::path::Path;
use std::time::Duration;

use anyhow::Context;

use scalesim_core::PlatformConfig;

pub use driver::Simulation;
pub use report::{CycleReport, GroupReport, RegionReport, SimulationReport};
pub use scenario::{Decision, Demand, Fault, Scenario, ScenarioConfig};

/// Load both files and replay the scenario with clock step `step`.
pub fn run_files(config: &Path, scenario: &Path, step: Duration) -> anyhow::Result<SimulationReport> {
    let platform = PlatformConfig::load(config)
        .with_context(|| format!("loading platform config {}", config.display()))?;
    let scenario = ScenarioConfig::from_file(scenario)?.build(&platform)?;
    Simulation::new(&platform, step)?.run(&scenario)
}
