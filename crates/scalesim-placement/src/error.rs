//! Placement error types.

use scalesim_core::NodeTypeId;
use scalesim_state::StateError;
use thiserror::Error;

use crate::scorer::ScoreUnit;

/// Errors that can occur while computing placements.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("node type not in catalog: {0}")]
    UnknownNodeType(NodeTypeId),

    #[error("cannot combine scores of different units: {left:?} vs {right:?}")]
    ScoreUnitMismatch { left: ScoreUnit, right: ScoreUnit },

    #[error("state error: {0}")]
    State(#[from] StateError),
}

pub type PlacementResult<T> = Result<T, PlacementError>;
