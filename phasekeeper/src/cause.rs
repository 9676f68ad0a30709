//! Attribution of mutations: [`CauseStack`], [`Cause`], and their contents.

use core::cell::{RefCell, RefMut};
use core::fmt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use arcstr::ArcStr;
use itertools::Itertools as _;

use crate::entity::EntityId;
use crate::math::Cube;
use crate::world::{BlockState, WorldId};


// -------------------------------------------------------------------------------------------------

/// One frame of a [`Cause`]: something which is responsible for a mutation.
#[derive(Clone, Debug, Eq, Hash, PartialEq, displaydoc::Display)]
#[non_exhaustive]
pub enum CauseObject {
    /// {0}
    Entity(EntityId),
    /// player {0}
    Player(EntityId),
    /// {state:?} at {cube:?} in {world}
    Block {
        /// World containing the block.
        world: WorldId,
        /// Location of the block.
        cube: Cube,
        /// State of the block when it was pushed.
        state: BlockState,
    },
    /// plugin {0}
    Plugin(ArcStr),
    /// damage source {0}
    DamageSource(ArcStr),
    /// portal agent {0}
    PortalAgent(ArcStr),
    /// {0}
    World(WorldId),
    /// the server
    Server,
    /// {0}
    Named(ArcStr),
}

impl CauseObject {
    /// Returns the entity this object refers to, if it is an entity or player.
    pub fn entity(&self) -> Option<EntityId> {
        match *self {
            CauseObject::Entity(id) | CauseObject::Player(id) => Some(id),
            _ => None,
        }
    }
}

/// Names of the side values which may be attached to a [`Cause`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum ContextKey {
    /// How an entity is being teleported. Value: [`ContextValue::TeleportType`].
    TeleportType,
    /// Who should be notified of the change, typically the player who initiated it.
    Notifier,
    /// Who owns the thing causing the change.
    Owner,
    /// Who launched the projectile causing the change.
    ProjectileSource,
    /// Why an entity is being spawned. Value: [`ContextValue::SpawnType`].
    SpawnType,
    /// The plugin on whose behalf the change is made.
    Plugin,
    /// The portal agent involved in a teleport.
    PortalAgent,
    /// The block which was hit. Value: [`ContextValue::Location`].
    BlockHit,
}

/// Values of [`Cause`] context entries.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum ContextValue {
    TeleportType(TeleportType),
    SpawnType(SpawnType),
    Object(CauseObject),
    Location(WorldId, Cube),
}

#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum TeleportType {
    Portal,
    Command,
    Entity,
    Plugin,
    Unknown,
}

#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum SpawnType {
    Placement,
    DropItem,
    BlockSpawning,
    Passive,
    Plugin,
    WorldSpawner,
}

// -------------------------------------------------------------------------------------------------

/// An immutable snapshot of a [`CauseStack`], attached to events.
///
/// Frames are ordered most recently pushed first; the first is the *root* cause.
#[derive(Clone, Eq, PartialEq)]
pub struct Cause {
    frames: Arc<[CauseObject]>,
    context: Arc<BTreeMap<ContextKey, ContextValue>>,
}

impl Cause {
    /// Constructs a cause containing only `object`, with no context.
    pub fn of(object: CauseObject) -> Self {
        Self {
            frames: Arc::from([object]),
            context: Arc::default(),
        }
    }

    /// Returns the most recently pushed frame.
    pub fn root(&self) -> Option<&CauseObject> {
        self.frames.first()
    }

    /// Returns all frames, most recently pushed first.
    pub fn frames(&self) -> &[CauseObject] {
        &self.frames
    }

    /// Returns the nearest frame which is an entity or player.
    pub fn first_entity(&self) -> Option<EntityId> {
        self.frames.iter().find_map(CauseObject::entity)
    }

    /// Whether `object` is one of the frames.
    pub fn contains(&self, object: &CauseObject) -> bool {
        self.frames.contains(object)
    }

    /// Returns the context value for `key` from the nearest scope which set it.
    pub fn context(&self, key: ContextKey) -> Option<&ContextValue> {
        self.context.get(&key)
    }

    /// Convenience for looking up [`ContextKey::TeleportType`].
    pub fn teleport_type(&self) -> Option<TeleportType> {
        match self.context(ContextKey::TeleportType) {
            Some(&ContextValue::TeleportType(t)) => Some(t),
            _ => None,
        }
    }

    /// Convenience for looking up a context entry whose value is a [`CauseObject`].
    pub fn context_object(&self, key: ContextKey) -> Option<&CauseObject> {
        match self.context(key) {
            Some(ContextValue::Object(object)) => Some(object),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Debug for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cause")
            .field("frames", &self.frames)
            .field("context", &self.context)
            .finish()
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.frames.iter().format(", "))
    }
}

// -------------------------------------------------------------------------------------------------

/// Stack of [`CauseObject`]s and context entries describing who is responsible for the
/// mutations currently being performed.
///
/// Use [`CauseStack::push_frame()`] to scope pushes; the returned guard restores the stack
/// when dropped. A `CauseStack` may only be used from the thread that created it.
pub struct CauseStack {
    owner: ThreadId,
    inner: RefCell<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    causes: Vec<CauseObject>,
    /// Context entries in the order added; later entries shadow earlier ones.
    context: Vec<(ContextKey, ContextValue)>,
    frames: Vec<FrameMark>,
    next_serial: u64,
}

#[derive(Clone, Copy, Debug)]
struct FrameMark {
    serial: u64,
    cause_depth: usize,
    context_len: usize,
}

impl CauseStack {
    /// Constructs an empty stack owned by the current thread.
    pub fn new() -> Self {
        Self {
            owner: thread::current().id(),
            inner: RefCell::default(),
        }
    }

    #[track_caller]
    fn inner(&self) -> RefMut<'_, Inner> {
        if thread::current().id() != self.owner {
            panic!(
                "CauseStack used from {:?}, but it belongs to {:?}",
                thread::current().id(),
                self.owner
            );
        }
        self.inner.borrow_mut()
    }

    /// Pushes a frame.
    pub fn push_cause(&self, object: CauseObject) {
        self.inner().causes.push(object);
    }

    /// Pops the most recently pushed frame and returns it.
    ///
    /// Panics if the stack is empty, or if the frame was pushed outside the innermost
    /// [`CauseStackFrame`] (it belongs to an enclosing scope).
    #[track_caller]
    pub fn pop_cause(&self) -> CauseObject {
        let mut inner = self.inner();
        let floor = inner.frames.last().map_or(0, |mark| mark.cause_depth);
        if inner.causes.len() <= floor {
            let depth = inner.causes.len();
            drop(inner);
            panic!("CauseStack underflow: pop_cause() at depth {depth} with scope floor {floor}");
        }
        inner
            .causes
            .pop()
            .unwrap_or_else(|| unreachable!("checked nonempty"))
    }

    /// Opens a scope. When the returned guard is dropped, the stack and context are restored
    /// to exactly what they are now.
    ///
    /// Guards must be dropped in the reverse order they were created.
    pub fn push_frame(&self) -> CauseStackFrame<'_> {
        let mut inner = self.inner();
        let serial = inner.next_serial;
        inner.next_serial += 1;
        let mark = FrameMark {
            serial,
            cause_depth: inner.causes.len(),
            context_len: inner.context.len(),
        };
        inner.frames.push(mark);
        CauseStackFrame { stack: self, serial }
    }

    /// Adds a context entry which lasts until the innermost open frame is released.
    /// Shadows any entry with the same key from enclosing scopes.
    pub fn add_context(&self, key: ContextKey, value: ContextValue) {
        self.inner().context.push((key, value));
    }

    /// Returns the context value currently in effect for `key`.
    pub fn context(&self, key: ContextKey) -> Option<ContextValue> {
        self.inner()
            .context
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
    }

    /// Freezes the current stack and context into a [`Cause`].
    pub fn current_cause(&self) -> Cause {
        let inner = self.inner();
        Cause {
            frames: inner.causes.iter().rev().cloned().collect(),
            // Collecting in insertion order makes later (nearer) entries win.
            context: Arc::new(inner.context.iter().cloned().collect()),
        }
    }

    /// Returns the number of [`CauseObject`]s on the stack.
    pub fn depth(&self) -> usize {
        self.inner().causes.len()
    }

    /// Returns the number of open [`CauseStackFrame`]s.
    pub fn frame_depth(&self) -> usize {
        self.inner().frames.len()
    }

    #[track_caller]
    fn release(&self, serial: u64) {
        if thread::panicking() {
            self.release_during_panic(serial);
            return;
        }
        let mut inner = self.inner();
        let Some(position) = inner.frames.iter().rposition(|mark| mark.serial == serial) else {
            drop(inner);
            panic!("CauseStackFrame #{serial} released twice or not from this stack");
        };
        let is_top = position == inner.frames.len() - 1;
        if !is_top {
            let open = inner.frames.len() - 1 - position;
            drop(inner);
            panic!(
                "CauseStackFrame #{serial} released while {open} frame(s) opened after it \
                 are still open"
            );
        }
        let mark = inner.frames[position];
        inner.frames.truncate(position);
        inner.causes.truncate(mark.cause_depth);
        inner.context.truncate(mark.context_len);
    }

    /// Like [`Self::release()`], but never panics, since a panic while panicking aborts.
    /// A frame already truncated away by an enclosing frame's release is ignored.
    fn release_during_panic(&self, serial: u64) {
        let Ok(mut inner) = self.inner.try_borrow_mut() else {
            return;
        };
        let Some(position) = inner.frames.iter().rposition(|mark| mark.serial == serial) else {
            return;
        };
        let mark = inner.frames[position];
        inner.frames.truncate(position);
        inner.causes.truncate(mark.cause_depth);
        inner.context.truncate(mark.context_len);
    }
}

impl Default for CauseStack {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CauseStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { owner, inner } = self;
        match inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("CauseStack")
                .field("owner", owner)
                .field("causes", &inner.causes)
                .field("context", &inner.context)
                .field("frames", &inner.frames.len())
                .finish(),
            Err(_) => f.write_str("CauseStack { <in use> }"),
        }
    }
}

/// Guard for a [`CauseStack`] scope, returned by [`CauseStack::push_frame()`].
///
/// Dropping it pops every cause and context entry added since it was created.
#[must_use = "the frame is released as soon as the guard is dropped"]
pub struct CauseStackFrame<'a> {
    stack: &'a CauseStack,
    serial: u64,
}

impl CauseStackFrame<'_> {
    /// Pushes a cause within this frame.
    pub fn push_cause(&self, object: CauseObject) -> &Self {
        self.stack.push_cause(object);
        self
    }

    /// Adds a context entry within this frame.
    pub fn add_context(&self, key: ContextKey, value: ContextValue) -> &Self {
        self.stack.add_context(key, value);
        self
    }
}

impl fmt::Debug for CauseStackFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CauseStackFrame").field(&self.serial).finish()
    }
}

impl Drop for CauseStackFrame<'_> {
    fn drop(&mut self) {
        self.stack.release(self.serial);
    }
}
