//! Error types for the platform state model.

use scalesim_core::NodeTypeId;
use thiserror::Error;

/// Result type alias for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while building or mutating platform state.
///
/// Every variant is a programming error in the caller: demand that merely
/// does not fit is reported through return values, never through here.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("capacity type mismatch: {left} vs {right}")]
    CapacityTypeMismatch { left: NodeTypeId, right: NodeTypeId },

    #[error("no requirement known for service `{service}` on {node_type}")]
    MissingRequirement {
        service: String,
        node_type: NodeTypeId,
    },

    #[error("cannot split {requested} nodes off a group of {available}")]
    SplitOutOfRange { requested: u64, available: u64 },

    #[error("node groups differ in composition: {0} vs {1}")]
    KeyMismatch(String, String),

    #[error("reshape must keep node type and node count: {0}")]
    UnevenReshape(String),

    #[error("node group {group} not present in region `{region}` ({wanted} nodes wanted, {present} present)")]
    MissingNodeGroup {
        region: String,
        group: String,
        wanted: u64,
        present: u64,
    },

    #[error("region `{region}` diverged: groups report {from_groups} `{service}` instances, ledger reports {from_ledger}")]
    Diverged {
        region: String,
        service: String,
        from_groups: i64,
        from_ledger: i64,
    },
}
