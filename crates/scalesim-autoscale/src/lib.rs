//! scalesim-autoscale: decision cycles over the simulated platform.
//!
//! Takes per-region scaling decisions (signed instance counts, optionally
//! with the per-instance requirement) and turns them into deltas on the
//! timeline.
//!
//! # Cycle
//!
//! ```text
//! demand ──► place_in_existing(projected groups, pending removals)
//!              │ residual > 0
//!              ▼
//!            DesiredStateCalculator (place → score → optimize)
//!              │
//!              ▼
//!            DeltaTimeline::add  ──► AdjustmentOutcome { accepted, unmet, unfit }
//! ```
//!
//! Residual removals and unfit services are reported as unmet; the caller
//! decides whether to resubmit them.

pub mod adjuster;
pub mod error;

pub use adjuster::{AdjustmentOutcome, PlatformAdjuster, ScalingDecision};
pub use error::{AdjustError, AdjustResult};
