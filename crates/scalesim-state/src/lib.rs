//! scalesim-state: the physical and logical state of the simulated platform.
//!
//! # Model
//!
//! ```text
//! PlatformState
//!   └── Region (by name)
//!         ├── HomogeneousNodeGroup (by NodeGroupKey = node type + per-node service mix)
//!         │     └── Capacity (normalized share of one node taken by the mix)
//!         └── service ledger (sum of every enforced ServiceCountDelta)
//! ```
//!
//! State only changes through [`GeneralizedDelta`]s. Node groups are plain
//! values: every mutation returns new groups and leaves the input untouched,
//! and two groups with the same key are the same group and merge.

pub mod capacity;
pub mod delta;
pub mod error;
pub mod node_group;
pub mod region;

pub use capacity::{Capacity, RequirementMap, ServiceInstanceRequirement};
pub use delta::{DeltaId, GeneralizedDelta, NodeChange, NodeGroupDelta, ServiceCountDelta, Sign};
pub use error::{StateError, StateResult};
pub use node_group::{GroupMutation, GroupSplit, HomogeneousNodeGroup, NodeGroupKey, ServiceMix};
pub use region::{EntityCountState, PlatformState, Region};
