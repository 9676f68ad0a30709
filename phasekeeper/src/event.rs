//! Events published by the tracking core, and the [`EventBus`] they are published to.
//!
//! Events are plain data. Listeners (outside this crate) may cancel an event, and some
//! events additionally allow vetoing or replacing individual parts of their payload.
//! The core re-reads the event after posting it and acts on what it finds.

use arcstr::ArcStr;

use crate::capture::BlockChange;
use crate::cause::Cause;
use crate::entity::{Entity, EntityId};
use crate::math::Cube;
use crate::transform::Transform;
use crate::world::{BlockState, WorldId};

/// Events which a listener may cancel.
pub trait Cancellable {
    #[allow(missing_docs)]
    fn is_cancelled(&self) -> bool;
    #[allow(missing_docs)]
    fn set_cancelled(&mut self, cancelled: bool);
}

macro_rules! impl_cancellable {
    ($($t:ty),*) => {
        $(
            impl Cancellable for $t {
                fn is_cancelled(&self) -> bool {
                    self.cancelled
                }
                fn set_cancelled(&mut self, cancelled: bool) {
                    self.cancelled = cancelled;
                }
            }
        )*
    };
}
impl_cancellable!(ChangeBlockEvent, SpawnEntityEvent, DropItemEvent, PortalTeleportEvent);

// -------------------------------------------------------------------------------------------------

/// One proposed block change within a [`ChangeBlockEvent`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockTransaction {
    world: WorldId,
    cube: Cube,
    original: BlockState,
    default_replacement: BlockState,
    custom: Option<BlockState>,
    valid: bool,
}

impl BlockTransaction {
    /// Constructs a valid transaction proposing `change`.
    pub fn new(change: &BlockChange) -> Self {
        Self {
            world: change.world,
            cube: change.cube,
            original: change.original.clone(),
            default_replacement: change.replacement.clone(),
            custom: None,
            valid: true,
        }
    }

    #[allow(missing_docs)]
    pub fn world(&self) -> WorldId {
        self.world
    }

    #[allow(missing_docs)]
    pub fn cube(&self) -> Cube {
        self.cube
    }

    /// The state before the change.
    pub fn original(&self) -> &BlockState {
        &self.original
    }

    /// The state the engine asked for.
    pub fn default_replacement(&self) -> &BlockState {
        &self.default_replacement
    }

    /// The state a listener asked for instead, if any.
    pub fn custom(&self) -> Option<&BlockState> {
        self.custom.as_ref()
    }

    /// Replaces the state which will be written if this transaction is committed.
    pub fn set_custom(&mut self, state: BlockState) {
        self.custom = Some(state);
    }

    /// The state which will be written if this transaction is committed.
    pub fn final_replacement(&self) -> &BlockState {
        self.custom.as_ref().unwrap_or(&self.default_replacement)
    }

    /// Whether this transaction will be committed (unless the entire event is cancelled).
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Vetoes this transaction.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

/// A batch of block changes captured during one phase, in one world.
#[derive(Clone, Debug)]
pub struct ChangeBlockEvent {
    cause: Cause,
    world: WorldId,
    transactions: Vec<BlockTransaction>,
    fully_cancellable: bool,
    cancelled: bool,
}

impl ChangeBlockEvent {
    pub(crate) fn new(
        cause: Cause,
        world: WorldId,
        transactions: Vec<BlockTransaction>,
        fully_cancellable: bool,
    ) -> Self {
        Self {
            cause,
            world,
            transactions,
            fully_cancellable,
            cancelled: false,
        }
    }

    #[allow(missing_docs)]
    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    /// The world all of the transactions are in.
    pub fn world(&self) -> WorldId {
        self.world
    }

    /// Transactions in the order they were captured.
    pub fn transactions(&self) -> &[BlockTransaction] {
        &self.transactions
    }

    /// Mutable access to transactions, for vetoing or replacing them.
    pub fn transactions_mut(&mut self) -> &mut [BlockTransaction] {
        &mut self.transactions
    }

    /// Invalidates every transaction for which `predicate` returns false.
    pub fn filter(&mut self, mut predicate: impl FnMut(&BlockTransaction) -> bool) {
        for transaction in &mut self.transactions {
            if !predicate(transaction) {
                transaction.invalidate();
            }
        }
    }

    /// If true, invalidating any transaction discards the whole batch.
    pub fn is_fully_cancellable(&self) -> bool {
        self.fully_cancellable
    }

    pub(crate) fn into_transactions(self) -> Vec<BlockTransaction> {
        self.transactions
    }
}

/// Entities about to be spawned.
#[derive(Clone, Debug)]
pub struct SpawnEntityEvent {
    cause: Cause,
    entities: Vec<Entity>,
    cancelled: bool,
}

impl SpawnEntityEvent {
    pub(crate) fn new(cause: Cause, entities: Vec<Entity>) -> Self {
        Self {
            cause,
            entities,
            cancelled: false,
        }
    }

    #[allow(missing_docs)]
    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    #[allow(missing_docs)]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Mutable access to the entities, for adjusting them before they are spawned.
    pub fn entities_mut(&mut self) -> &mut [Entity] {
        &mut self.entities
    }

    /// Removes entities for which `predicate` returns false; they will not be spawned.
    pub fn filter_entities(&mut self, predicate: impl FnMut(&Entity) -> bool) {
        self.entities.retain(predicate);
    }

    pub(crate) fn into_entities(self) -> Vec<Entity> {
        self.entities
    }
}

/// Items about to be dropped into the world.
#[derive(Clone, Debug)]
pub struct DropItemEvent {
    cause: Cause,
    items: Vec<Entity>,
    cancelled: bool,
}

impl DropItemEvent {
    pub(crate) fn new(cause: Cause, items: Vec<Entity>) -> Self {
        Self {
            cause,
            items,
            cancelled: false,
        }
    }

    #[allow(missing_docs)]
    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    /// The item entities.
    pub fn items(&self) -> &[Entity] {
        &self.items
    }

    /// Removes items for which `predicate` returns false; they will not be dropped.
    pub fn filter_items(&mut self, predicate: impl FnMut(&Entity) -> bool) {
        self.items.retain(predicate);
    }

    pub(crate) fn into_items(self) -> Vec<Entity> {
        self.items
    }
}

/// An entity is about to travel through a portal to another world.
///
/// Listeners may cancel it, change the destination, decline the portal agent's block
/// changes, or ask for the entity's velocity to be kept.
#[derive(Clone, Debug)]
pub struct PortalTeleportEvent {
    cause: Cause,
    subject: EntityId,
    from: Transform,
    to: Transform,
    portal_agent: Option<ArcStr>,
    use_portal_agent: bool,
    keep_velocity: bool,
    cancelled: bool,
}

impl PortalTeleportEvent {
    /// Constructs an event proposing to move `subject` from `from` to `to`.
    ///
    /// May be used to construct an event ahead of time to pass to
    /// [`transfer_entity()`](crate::transfer::transfer_entity), which then does not ask the
    /// portal agent for a destination.
    pub fn new(
        cause: Cause,
        subject: EntityId,
        from: Transform,
        to: Transform,
        portal_agent: Option<ArcStr>,
    ) -> Self {
        Self {
            cause,
            subject,
            from,
            to,
            portal_agent,
            use_portal_agent: true,
            keep_velocity: false,
            cancelled: false,
        }
    }

    #[allow(missing_docs)]
    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    #[allow(missing_docs)]
    pub fn subject(&self) -> EntityId {
        self.subject
    }

    /// Where the subject was before the teleport.
    pub fn from(&self) -> Transform {
        self.from
    }

    /// Where the subject will be after the teleport.
    pub fn to(&self) -> Transform {
        self.to
    }

    #[allow(missing_docs)]
    pub fn set_to(&mut self, to: Transform) {
        self.to = to;
    }

    /// Name of the portal agent which computed the destination, if any.
    pub fn portal_agent(&self) -> Option<&ArcStr> {
        self.portal_agent.as_ref()
    }

    /// Whether blocks placed by the portal agent (such as a portal frame at the
    /// destination) will be kept.
    pub fn use_portal_agent(&self) -> bool {
        self.use_portal_agent
    }

    #[allow(missing_docs)]
    pub fn set_use_portal_agent(&mut self, value: bool) {
        self.use_portal_agent = value;
    }

    /// Whether the subject keeps its velocity after arriving.
    pub fn keep_velocity(&self) -> bool {
        self.keep_velocity
    }

    #[allow(missing_docs)]
    pub fn set_keep_velocity(&mut self, value: bool) {
        self.keep_velocity = value;
    }
}

// -------------------------------------------------------------------------------------------------

/// Identifies the type of an event without its contents.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[allow(missing_docs)]
pub enum EventKind {
    ChangeBlock,
    SpawnEntity,
    DropItem,
    PortalTeleport,
}

/// Mutable reference to any of the events published by the core.
#[derive(Debug)]
#[allow(missing_docs)]
pub enum EventMut<'a> {
    ChangeBlock(&'a mut ChangeBlockEvent),
    SpawnEntity(&'a mut SpawnEntityEvent),
    DropItem(&'a mut DropItemEvent),
    PortalTeleport(&'a mut PortalTeleportEvent),
}

impl EventMut<'_> {
    #[allow(missing_docs)]
    pub fn kind(&self) -> EventKind {
        match self {
            EventMut::ChangeBlock(_) => EventKind::ChangeBlock,
            EventMut::SpawnEntity(_) => EventKind::SpawnEntity,
            EventMut::DropItem(_) => EventKind::DropItem,
            EventMut::PortalTeleport(_) => EventKind::PortalTeleport,
        }
    }

    #[allow(missing_docs)]
    pub fn cause(&self) -> &Cause {
        match self {
            EventMut::ChangeBlock(e) => e.cause(),
            EventMut::SpawnEntity(e) => e.cause(),
            EventMut::DropItem(e) => e.cause(),
            EventMut::PortalTeleport(e) => e.cause(),
        }
    }

    /// Reborrows, so that the event can be passed to more than one listener.
    pub fn reborrow(&mut self) -> EventMut<'_> {
        match self {
            EventMut::ChangeBlock(e) => EventMut::ChangeBlock(e),
            EventMut::SpawnEntity(e) => EventMut::SpawnEntity(e),
            EventMut::DropItem(e) => EventMut::DropItem(e),
            EventMut::PortalTeleport(e) => EventMut::PortalTeleport(e),
        }
    }
}

impl Cancellable for EventMut<'_> {
    fn is_cancelled(&self) -> bool {
        match self {
            EventMut::ChangeBlock(e) => e.is_cancelled(),
            EventMut::SpawnEntity(e) => e.is_cancelled(),
            EventMut::DropItem(e) => e.is_cancelled(),
            EventMut::PortalTeleport(e) => e.is_cancelled(),
        }
    }

    fn set_cancelled(&mut self, cancelled: bool) {
        match self {
            EventMut::ChangeBlock(e) => e.set_cancelled(cancelled),
            EventMut::SpawnEntity(e) => e.set_cancelled(cancelled),
            EventMut::DropItem(e) => e.set_cancelled(cancelled),
            EventMut::PortalTeleport(e) => e.set_cancelled(cancelled),
        }
    }
}

/// Dispatches events to listeners.
///
/// The core calls [`EventBus::post()`] at each decision point and then reads back the
/// event, including its cancellation flag, to decide what to do.
pub trait EventBus {
    /// Delivers the event to listeners. Returns whether the event is cancelled afterward.
    fn post(&mut self, event: EventMut<'_>) -> bool;
}

/// No listeners: every event proceeds as proposed.
impl EventBus for () {
    fn post(&mut self, event: EventMut<'_>) -> bool {
        event.is_cancelled()
    }
}

impl<T: EventBus + ?Sized> EventBus for &mut T {
    fn post(&mut self, event: EventMut<'_>) -> bool {
        (**self).post(event)
    }
}
