//! scalesim timeline: when deltas become real.
//!
//! Decisions are proposed instantly but enforced only once the scaling delay
//! of the nodes and services they touch has elapsed. The [`DeltaTimeline`]
//! owns the authoritative [`scalesim_state::PlatformState`] and is the only
//! component that mutates it.
//!
//! ```text
//!  add(t, Δ) ──► proposed ──roll_out(≥t)──► enforced @ t+delay ──roll_out(≥t+delay)──► PlatformState
//!                                               │ source nodes missing
//!                                               ▼
//!                                           deferred ──(after each later enforcement)──┘
//! ```

pub mod delay;
pub mod error;
pub mod timeline;

pub use delay::ScalingDelayProvider;
pub use error::{TimelineError, TimelineResult};
pub use timeline::{DeltaTimeline, PendingDelta};
