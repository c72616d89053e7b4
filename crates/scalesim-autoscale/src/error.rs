//! Adjuster error types.

use scalesim_core::ConfigError;
use scalesim_placement::PlacementError;
use scalesim_state::StateError;
use scalesim_timeline::TimelineError;
use thiserror::Error;

/// Structural failures of a decision cycle. Unmet demand is not an error.
#[derive(Debug, Error)]
pub enum AdjustError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("placement error: {0}")]
    Placement(#[from] PlacementError),

    #[error("timeline error: {0}")]
    Timeline(#[from] TimelineError),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

pub type AdjustResult<T> = Result<T, AdjustError>;
