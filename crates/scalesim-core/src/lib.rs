//! scalesim-core: shared vocabulary for the autoscaling simulator.
//!
//! Holds the simulated clock, absolute resource vectors, the node-type and
//! service catalog, and the `platform.toml` configuration loader. Every other
//! crate in the workspace builds on these types.

pub mod config;
pub mod error;
pub mod types;

pub use config::{AdjustmentSettings, Platform, PlatformConfig, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
