//! scalesim placement: where service instances go.
//!
//! Two decisions are made here. The in-place engine realizes a demand
//! change on the nodes a region already has (or is about to lose). The
//! desired-state calculator provisions new node groups for whatever is
//! left, choosing among node types by place / score / optimize.
//!
//! # Components
//!
//! - **`placer`**: In-place engine (decommission, fill, rescue)
//! - **`calculator`**: Recipes, placers, optimizer, desired-state calculator
//! - **`scorer`**: Unit-tagged scores (price, packing)
//! - **`registry`**: Strategies by name, assembled from configuration
//! - **`convert`**: Per-node-type requirements from the catalog

pub mod calculator;
pub mod convert;
pub mod error;
pub mod placer;
pub mod registry;
pub mod scorer;

pub use calculator::{
    BalancedPlacer, DesiredStateCalculator, MaxScoreOptimizer, Optimizer, PlacementRecipe, Placer,
    Provisioning, ScoredRecipe, SpecializedPlacer, UnfitRequirement,
};
pub use convert::RequirementCatalog;
pub use error::{PlacementError, PlacementResult};
pub use placer::{InPlacePlacement, PendingRemoval, place_in_existing};
pub use registry::StrategyRegistry;
pub use scorer::{PackingScorer, PriceScorer, Score, ScoreUnit, Scorer};
