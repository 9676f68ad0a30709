//! Phase states and the per-phase contexts paired with them.
//!
//! A [`PhaseState`] is a tag naming what the engine is doing, and answers fixed policy
//! questions about it. All data gathered while the phase is active lives in its
//! [`PhaseContext`].

mod context;
pub use context::*;

mod state;
pub use state::*;
