//! Phasekeeper makes a game server's internal world mutations observable, attributable,
//! and cancellable by plugins, without changing what the server does when nobody is
//! listening.
//!
//! ## Concepts
//!
//! * Engine code runs inside *phases*: named scopes such as “ticking an entity” or
//!   “invoking a portal agent”. A [`TrackingSession`] owns the stack of active phases, and
//!   each phase is a [`PhaseContext`] paired with a [`PhaseState`].
//! * The state decides, per kind of mutation, whether a mutation requested inside the
//!   phase is *captured* (buffered as a record in the context), applied immediately, or
//!   rejected. See [`PhaseState::block_policy()`] and [`PhaseState::spawn_policy()`].
//! * When a phase is closed, its captures are turned into cancellable events
//!   ([`event`]) attributed to the current [`Cause`], and committed to the world or rolled
//!   back depending on what listeners decided ([`tracking`]).
//! * The [`transfer`] module moves entities and players between worlds; it is the largest
//!   consumer of the above and shows how cancellation is handled partway through a
//!   multi-step operation.
//!
//! ## Embedding
//!
//! Phasekeeper does not patch anything. The embedding engine must route its world
//! mutations through the session's entry points ([`TrackingSession::set_block()`],
//! [`TrackingSession::spawn_entity()`], [`TrackingSession::drop_item()`]) and open phases
//! around its own operations with [`TrackingSession::scope()`], which publishes a phase's
//! captures even if the operation returns early with an error. [`TrackingSession::enter()`]
//! is the lower-level form, for phases that span several calls. World storage, event
//! dispatch, and client networking are reached only through the traits
//! [`WorldAccess`], [`EventBus`], [`PortalAgent`], and [`PlayerSession`].
//!
//! ## Threading and scope discipline
//!
//! A session belongs to the thread that created it (the server's simulation thread), and
//! every operation checks this. Cause frames and phase guards must be released in the
//! reverse order they were acquired. Violations of either rule are bugs in the caller, and
//! are reported by panicking with a printout of the phase stack, rather than as errors.
//!
//! ## Dependencies and global state
//!
//! `phasekeeper` has no global state. It writes log messages using the [`log`] crate
//! and is therefore subject to that global configuration; see
//! [`util::standard_filter()`] for a recommended filter.
//!
//! [`Cause`]: crate::cause::Cause
//! [`EventBus`]: crate::event::EventBus
//! [`PhaseContext`]: crate::phase::PhaseContext
//! [`PhaseState`]: crate::phase::PhaseState
//! [`PhaseState::block_policy()`]: crate::phase::PhaseState::block_policy
//! [`PhaseState::spawn_policy()`]: crate::phase::PhaseState::spawn_policy
//! [`PlayerSession`]: crate::transfer::PlayerSession
//! [`PortalAgent`]: crate::transfer::PortalAgent
//! [`TrackingSession`]: crate::tracker::TrackingSession
//! [`TrackingSession::enter()`]: crate::tracker::TrackingSession::enter
//! [`TrackingSession::scope()`]: crate::tracker::TrackingSession::scope
//! [`TrackingSession::set_block()`]: crate::tracker::TrackingSession::set_block
//! [`TrackingSession::spawn_entity()`]: crate::tracker::TrackingSession::spawn_entity
//! [`TrackingSession::drop_item()`]: crate::tracker::TrackingSession::drop_item
//! [`WorldAccess`]: crate::world::WorldAccess

// Crate-specific lint settings. (General settings can be found in the workspace manifest.)
#![forbid(unsafe_code)]
// Lenience for tests.
#![cfg_attr(test,
    allow(clippy::float_cmp), // deterministic tests
    allow(clippy::redundant_clone), // prefer regularity over efficiency
)]

pub mod archetype;
pub mod capture;
pub mod cause;
pub mod config;
pub mod entity;
pub mod event;
pub mod phase;
pub mod tracker;
pub mod tracking;
pub mod transfer;
pub mod transform;
pub mod world;

#[doc(hidden)] // Exported only for use by tests and embedders' test suites
pub mod testing;

/// Coordinate types.
pub mod math {
    #[doc(inline)]
    pub use phasekeeper_base::math::*;
}

/// Tools that we could imagine being in the Rust standard library, but aren't.
pub mod util {
    #[doc(inline)]
    pub use phasekeeper_base::util::*;
}

pub use tracker::TrackingSession;

/// Re-export the version of the `euclid` vector math library we're using.
pub use euclid;
