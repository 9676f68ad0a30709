//! This library is an internal component of [`phasekeeper`],
//! which defines some core coordinate types and utility functions.
//! Do not depend on this library; use only [`phasekeeper`] instead.
//!
//! [`phasekeeper`]: https://crates.io/crates/phasekeeper/

/// Do not use this module directly; its contents are re-exported from `phasekeeper`.
pub mod math;

/// Do not use this module directly; its contents are re-exported from `phasekeeper`.
pub mod util;

// reexport for convenience of our tests
#[doc(hidden)]
pub use euclid;
