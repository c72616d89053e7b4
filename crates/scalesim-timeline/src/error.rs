//! Timeline error types.

use scalesim_core::NodeTypeId;
use scalesim_state::{DeltaId, StateError};
use thiserror::Error;

/// Errors raised while scheduling or enforcing deltas.
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("no scaling delay known for node type {0}")]
    UnknownNodeType(NodeTypeId),

    #[error("no scaling delay known for service `{0}` and no default profile")]
    MissingDelayProfile(String),

    #[error("cannot sample delay: {0}")]
    Sampling(String),

    #[error("compensation target {0} is not a pending removal")]
    UnknownCompensationTarget(DeltaId),

    #[error("compensation of {requested} nodes exceeds the {available} nodes {target} still removes")]
    OverCompensation {
        target: DeltaId,
        requested: u64,
        available: u64,
    },

    #[error("state error: {0}")]
    State(#[from] StateError),
}

pub type TimelineResult<T> = Result<T, TimelineError>;
