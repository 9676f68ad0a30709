use arcstr::ArcStr;

use crate::capture::{BlockChange, CapturedDrop, CapturedSpawn, Captures};
use crate::cause::CauseObject;
use crate::entity::EntityId;
use crate::phase::PhaseState;
use crate::transform::Transform;
use crate::world::{WorldAccess, WorldId};

/// Data gathered during one active phase: its captures, attribution hints, and
/// state-specific fields.
///
/// A context is built by the code entering the phase, handed to
/// [`TrackingSession::enter()`](crate::TrackingSession::enter), and from then on owned by
/// the session until the phase ends.
#[derive(Debug)]
pub struct PhaseContext {
    state: PhaseState,
    target_world: Option<WorldId>,
    source: Option<CauseObject>,
    notifier: Option<CauseObject>,
    owner: Option<CauseObject>,
    blocks: Captures<BlockChange>,
    spawns: Captures<CapturedSpawn>,
    drops: Captures<CapturedDrop>,
    extra: PhaseExtra,
}

/// Fields of a [`PhaseContext`] which only some states use.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub enum PhaseExtra {
    #[allow(missing_docs)]
    #[default]
    None,
    /// Used by [`EntityPhase::InvokingTeleporter`](crate::phase::EntityPhase::InvokingTeleporter).
    Teleport(TeleportExtra),
    /// Used by [`EntityPhase::ChangingDimension`](crate::phase::EntityPhase::ChangingDimension).
    DimensionChange {
        /// The entity being moved.
        subject: EntityId,
        #[allow(missing_docs)]
        from: WorldId,
        #[allow(missing_docs)]
        to: WorldId,
    },
}

/// State of a portal agent invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct TeleportExtra {
    /// Name of the portal agent being invoked.
    pub portal_agent: ArcStr,
    /// The entity being teleported.
    pub subject: EntityId,
    /// Where the subject was before the agent ran.
    pub from: Transform,
    /// The exit the agent computed, once known.
    pub exit: Option<Transform>,
    /// Whether the agent placed the subject itself (as opposed to declining and leaving
    /// the default exit to be used).
    pub did_port: bool,
}

impl PhaseContext {
    /// Constructs a context with no attribution hints and no captures.
    pub fn new(state: PhaseState) -> Self {
        Self {
            state,
            target_world: None,
            source: None,
            notifier: None,
            owner: None,
            blocks: Captures::new(),
            spawns: Captures::new(),
            drops: Captures::new(),
            extra: PhaseExtra::None,
        }
    }

    /// Sets the world the phase is operating on.
    #[must_use]
    pub fn with_target_world(mut self, world: WorldId) -> Self {
        self.target_world = Some(world);
        self
    }

    /// Sets the object the phase is operating on behalf of, which becomes the root cause
    /// of events published when the phase ends.
    #[must_use]
    pub fn with_source(mut self, source: CauseObject) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets who should be notified of changes made during the phase.
    #[must_use]
    pub fn with_notifier(mut self, notifier: CauseObject) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Sets who owns the changes made during the phase.
    #[must_use]
    pub fn with_owner(mut self, owner: CauseObject) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Sets the state-specific fields.
    #[must_use]
    pub fn with_extra(mut self, extra: PhaseExtra) -> Self {
        self.extra = extra;
        self
    }

    #[allow(missing_docs)]
    pub fn state(&self) -> PhaseState {
        self.state
    }

    #[allow(missing_docs)]
    pub fn target_world(&self) -> Option<WorldId> {
        self.target_world
    }

    #[allow(missing_docs)]
    pub fn source(&self) -> Option<&CauseObject> {
        self.source.as_ref()
    }

    #[allow(missing_docs)]
    pub fn notifier(&self) -> Option<&CauseObject> {
        self.notifier.as_ref()
    }

    #[allow(missing_docs)]
    pub fn owner(&self) -> Option<&CauseObject> {
        self.owner.as_ref()
    }

    /// Captured block changes.
    pub fn blocks(&self) -> &Captures<BlockChange> {
        &self.blocks
    }

    #[allow(missing_docs)]
    pub fn blocks_mut(&mut self) -> &mut Captures<BlockChange> {
        &mut self.blocks
    }

    /// Captured entity spawns.
    pub fn spawns(&self) -> &Captures<CapturedSpawn> {
        &self.spawns
    }

    #[allow(missing_docs)]
    pub fn spawns_mut(&mut self) -> &mut Captures<CapturedSpawn> {
        &mut self.spawns
    }

    /// Captured item drops.
    pub fn drops(&self) -> &Captures<CapturedDrop> {
        &self.drops
    }

    #[allow(missing_docs)]
    pub fn drops_mut(&mut self) -> &mut Captures<CapturedDrop> {
        &mut self.drops
    }

    #[allow(missing_docs)]
    pub fn extra(&self) -> &PhaseExtra {
        &self.extra
    }

    #[allow(missing_docs)]
    pub fn extra_mut(&mut self) -> &mut PhaseExtra {
        &mut self.extra
    }

    /// Returns the teleport fields, if this context has them.
    pub fn teleport(&self) -> Option<&TeleportExtra> {
        match &self.extra {
            PhaseExtra::Teleport(t) => Some(t),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn teleport_mut(&mut self) -> Option<&mut TeleportExtra> {
        match &mut self.extra {
            PhaseExtra::Teleport(t) => Some(t),
            _ => None,
        }
    }

    /// Whether any captures of any kind are present.
    pub fn has_captures(&self) -> bool {
        !(self.blocks.is_empty() && self.spawns.is_empty() && self.drops.is_empty())
    }

    /// Returns the number of captured block changes, spawns, and drops.
    pub fn capture_counts(&self) -> [usize; 3] {
        [self.blocks.len(), self.spawns.len(), self.drops.len()]
    }

    /// Restores and discards every capture. Returns the number of records discarded.
    pub fn restore_all(&mut self, worlds: &mut dyn WorldAccess) -> usize {
        self.drops.restore_originals(worlds)
            + self.spawns.restore_originals(worlds)
            + self.blocks.restore_originals(worlds)
    }
}
