//! [`TrackingSession`], the entry point for engine code, and the phase stack it owns.

use core::cell::{Cell, Ref, RefCell, RefMut};
use core::fmt;
use std::thread::{self, ThreadId};

use crate::capture::{BlockChange, CapturedDrop, CapturedSpawn, Captures};
use crate::cause::CauseStack;
use crate::config::TrackingConfig;
use crate::entity::Entity;
use crate::event::EventBus;
use crate::math::Cube;
use crate::phase::{BlockPolicy, PhaseContext, PhaseState, SpawnPolicy, UnwindAction};
use crate::tracking::{self, UnwindOutcome};
use crate::util::ErrorChain;
use crate::world::{BlockState, WorldAccess, WorldId};


// -------------------------------------------------------------------------------------------------

/// The tracking state of one simulation thread: its [`CauseStack`] and phase stack.
///
/// Engine code routes world mutations through [`TrackingSession::set_block()`],
/// [`TrackingSession::spawn_entity()`], and [`TrackingSession::drop_item()`], and brackets
/// its own operations with [`TrackingSession::enter()`].
///
/// A session may only be used from the thread that created it.
#[derive(Debug)]
pub struct TrackingSession {
    config: TrackingConfig,
    causes: CauseStack,
    phases: PhaseTracker,
}

/// Result of [`TrackingSession::set_block()`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BlockChangeOutcome {
    /// The change was buffered, to be published when the current phase ends.
    Captured,
    /// The change was written to the world.
    Applied,
    /// The current phase does not permit block changes.
    Rejected,
    /// The world does not exist or refused the write.
    Failed,
}

/// Result of [`TrackingSession::spawn_entity()`] and [`TrackingSession::drop_item()`].
#[derive(Clone, Debug, PartialEq)]
pub enum SpawnOutcome {
    /// The spawn was buffered, to be published when the current phase ends.
    Captured,
    /// The entity was attached to its world.
    Spawned,
    /// The entity could not be attached, and is returned.
    Failed(Entity),
}

impl TrackingSession {
    /// Constructs a session with default settings, owned by the current thread.
    pub fn new() -> Self {
        Self::with_config(TrackingConfig::default())
    }

    /// Constructs a session with the given settings, owned by the current thread.
    ///
    /// Invalid settings are logged and used anyway.
    pub fn with_config(config: TrackingConfig) -> Self {
        if let Err(error) = config.validate() {
            log::warn!("using invalid tracking settings: {}", ErrorChain(&error));
        }
        Self {
            config,
            causes: CauseStack::new(),
            phases: PhaseTracker::new(),
        }
    }

    #[allow(missing_docs)]
    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// The cause stack used to attribute events published by this session.
    pub fn causes(&self) -> &CauseStack {
        &self.causes
    }

    /// The phase stack.
    pub fn phases(&self) -> &PhaseTracker {
        &self.phases
    }

    /// Enters a phase. It stays the current phase until the returned guard is closed or
    /// dropped, or another phase is entered.
    ///
    /// Guards must be released in the reverse order they were created.
    pub fn enter(&self, context: PhaseContext) -> PhaseGuard<'_> {
        let state = context.state();
        let serial = self.phases.push(context);
        let depth = self.phases.depth();
        log::trace!("enter {state} (depth {depth})");
        if depth > self.config.phase_depth_warning {
            log::warn!(
                "phase stack is {depth} deep, exceeding {}; entered {state}",
                self.config.phase_depth_warning
            );
        }
        PhaseGuard {
            session: self,
            serial,
            closed: false,
        }
    }

    /// Runs `f` inside a phase, then closes the phase.
    ///
    /// The state's [`UnwindAction`] runs whatever `f` returns, so an `Err` propagated out
    /// of `f` with `?` still publishes what was captured before it. If `f` panics, the
    /// captures are discarded instead.
    ///
    /// This is the usual way for engine code to open a phase; use
    /// [`TrackingSession::enter()`] when the phase must outlive a single call.
    ///
    /// ```
    /// use phasekeeper::TrackingSession;
    /// use phasekeeper::math::Cube;
    /// use phasekeeper::phase::{PhaseContext, PhaseState, TickPhase};
    /// use phasekeeper::world::{BlockState, DimensionKind, Universe, WorldAccess as _};
    ///
    /// let mut universe = Universe::new();
    /// let world = universe.create_simple_world("overworld", DimensionKind::Overworld);
    /// let session = TrackingSession::new();
    ///
    /// let (result, outcome) = session.scope(
    ///     PhaseContext::new(PhaseState::Tick(TickPhase::Block)),
    ///     &mut universe,
    ///     &mut (),
    ///     |_, worlds, _| {
    ///         session.set_block(worlds, world, Cube::ORIGIN, BlockState::new("minecraft:stone"));
    ///         Err::<(), _>("the rest of the tick failed")
    ///     },
    /// );
    /// assert!(result.is_err());
    /// assert_eq!(outcome.blocks_accepted, Some(true));
    /// assert_eq!(
    ///     universe.block_state(world, Cube::ORIGIN),
    ///     Some(BlockState::new("minecraft:stone"))
    /// );
    /// ```
    pub fn scope<R>(
        &self,
        context: PhaseContext,
        worlds: &mut dyn WorldAccess,
        bus: &mut dyn EventBus,
        f: impl FnOnce(&PhaseGuard<'_>, &mut dyn WorldAccess, &mut dyn EventBus) -> R,
    ) -> (R, UnwindOutcome) {
        let guard = self.enter(context);
        let output = f(&guard, &mut *worlds, &mut *bus);
        let outcome = guard.close(worlds, bus);
        (output, outcome)
    }

    /// Returns the state of the current phase, or [`PhaseState::Idle`] if none.
    pub fn current_state(&self) -> PhaseState {
        self.phases.current_state()
    }

    /// Calls `f` with the current phase context.
    ///
    /// Outside any phase, this is an empty [`PhaseState::Idle`] context.
    /// `f` must not call back into this session.
    pub fn with_current_context<R>(&self, f: impl FnOnce(&PhaseContext) -> R) -> R {
        f(&self.phases.top())
    }

    /// Returns the number of phases entered and not yet released.
    pub fn depth(&self) -> usize {
        self.phases.depth()
    }

    /// Changes a block, according to the current phase's [`BlockPolicy`].
    pub fn set_block(
        &self,
        worlds: &mut dyn WorldAccess,
        world: WorldId,
        cube: Cube,
        state: BlockState,
    ) -> BlockChangeOutcome {
        let phase = self.current_state();
        let policy = match phase.block_policy() {
            BlockPolicy::Capture if !self.config.capture_block_changes => BlockPolicy::Immediate,
            policy => policy,
        };
        match policy {
            BlockPolicy::Capture => {
                let Some(in_world) = worlds.block_state(world, cube) else {
                    return BlockChangeOutcome::Failed;
                };
                let mut top = self.phases.top_mut();
                // Chain onto this phase's own earlier change to the cube, so that restoring
                // in reverse order ends at the world's state. Changes pending in enclosing
                // phases are not originals; rolling back must not write them.
                let original = top
                    .blocks()
                    .latest_for(world, cube)
                    .cloned()
                    .unwrap_or(in_world);
                top.blocks_mut().capture(BlockChange {
                    world,
                    cube,
                    original,
                    replacement: state,
                });
                BlockChangeOutcome::Captured
            }
            BlockPolicy::Immediate => {
                if worlds.set_block_state(world, cube, state) {
                    BlockChangeOutcome::Applied
                } else {
                    BlockChangeOutcome::Failed
                }
            }
            BlockPolicy::Reject => {
                log::debug!("rejected change of {cube:?} in {world} during {phase}");
                BlockChangeOutcome::Rejected
            }
        }
    }

    /// Reads a block as engine code inside the current phase should see it: the most
    /// recent captured change to that cube in any active phase, or else the world's state.
    pub fn block_state(
        &self,
        worlds: &dyn WorldAccess,
        world: WorldId,
        cube: Cube,
    ) -> Option<BlockState> {
        worlds.world_info(world)?;
        self.phases
            .pending_block(world, cube)
            .or_else(|| worlds.block_state(world, cube))
    }

    /// Spawns an entity into the world its transform names, according to the current
    /// phase's [`SpawnPolicy`].
    pub fn spawn_entity(&self, worlds: &mut dyn WorldAccess, entity: Entity) -> SpawnOutcome {
        if entity.is_removed() || worlds.world_info(entity.world()).is_none() {
            return SpawnOutcome::Failed(entity);
        }
        let policy = match self.current_state().spawn_policy() {
            _ if !self.config.capture_entity_spawns => SpawnPolicy::Force,
            policy => policy,
        };
        match policy {
            SpawnPolicy::Force => force_spawn(worlds, entity),
            SpawnPolicy::Capture | SpawnPolicy::CaptureWithOwner => {
                let mut top = self.phases.top_mut();
                let owner = match policy {
                    SpawnPolicy::CaptureWithOwner => tracking::owner_of(&top),
                    _ => None,
                };
                top.spawns_mut().capture(CapturedSpawn { entity, owner });
                SpawnOutcome::Captured
            }
        }
    }

    /// Drops an item entity into the world, capturing it if the current phase captures
    /// drops and spawning it immediately otherwise.
    pub fn drop_item(&self, worlds: &mut dyn WorldAccess, item: Entity) -> SpawnOutcome {
        if item.is_removed() || worlds.world_info(item.world()).is_none() {
            return SpawnOutcome::Failed(item);
        }
        if self.current_state().captures_item_drops() && self.config.capture_entity_spawns {
            let mut top = self.phases.top_mut();
            let owner = tracking::owner_of(&top);
            top.drops_mut().capture(CapturedDrop { item, owner });
            SpawnOutcome::Captured
        } else {
            force_spawn(worlds, item)
        }
    }
}

impl Default for TrackingSession {
    fn default() -> Self {
        Self::new()
    }
}

fn force_spawn(worlds: &mut dyn WorldAccess, entity: Entity) -> SpawnOutcome {
    match worlds.spawn_entity(entity.world(), entity) {
        Ok(()) => SpawnOutcome::Spawned,
        Err(entity) => SpawnOutcome::Failed(entity),
    }
}

// -------------------------------------------------------------------------------------------------

/// Stack of active [`PhaseContext`]s, with an idle context as its permanent floor.
pub struct PhaseTracker {
    owner: ThreadId,
    stack: RefCell<Vec<Entry>>,
    next_serial: Cell<u64>,
}

struct Entry {
    serial: u64,
    context: PhaseContext,
}

impl PhaseTracker {
    fn new() -> Self {
        Self {
            owner: thread::current().id(),
            stack: RefCell::new(vec![Entry {
                serial: 0,
                context: PhaseContext::new(PhaseState::Idle),
            }]),
            next_serial: Cell::new(1),
        }
    }

    #[track_caller]
    fn check_thread(&self) {
        let current = thread::current().id();
        if current != self.owner {
            panic!(
                "phase tracking used from {current:?}, but it belongs to {:?}",
                self.owner
            );
        }
    }

    fn push(&self, context: PhaseContext) -> u64 {
        self.check_thread();
        let serial = self.next_serial.get();
        self.next_serial.set(serial + 1);
        self.stack.borrow_mut().push(Entry { serial, context });
        serial
    }

    /// Removes the entry with the given serial, which must be on top.
    #[track_caller]
    fn pop(&self, serial: u64) -> PhaseContext {
        self.check_thread();
        let mut stack = self.stack.borrow_mut();
        let position = stack.iter().rposition(|entry| entry.serial == serial);
        match position {
            Some(position) if position > 0 && position == stack.len() - 1 => {}
            _ => {
                drop(stack);
                panic!(
                    "phase #{serial} released out of order or twice\n{}",
                    self.describe()
                );
            }
        }
        match stack.pop() {
            Some(entry) => entry.context,
            None => unreachable!("phase stack floor"),
        }
    }

    /// Like [`Self::pop()`], but never panics, since a panic while panicking aborts.
    fn pop_during_panic(&self, serial: u64) -> Option<PhaseContext> {
        let mut stack = self.stack.try_borrow_mut().ok()?;
        let position = stack.iter().rposition(|entry| entry.serial == serial)?;
        if position == 0 {
            return None;
        }
        stack.truncate(position + 1);
        stack.pop().map(|entry| entry.context)
    }

    #[track_caller]
    fn top(&self) -> Ref<'_, PhaseContext> {
        self.check_thread();
        Ref::map(self.stack.borrow(), |stack| match stack.last() {
            Some(entry) => &entry.context,
            None => unreachable!("phase stack floor"),
        })
    }

    #[track_caller]
    fn top_mut(&self) -> RefMut<'_, PhaseContext> {
        self.check_thread();
        RefMut::map(self.stack.borrow_mut(), |stack| match stack.last_mut() {
            Some(entry) => &mut entry.context,
            None => unreachable!("phase stack floor"),
        })
    }

    #[track_caller]
    fn entry_mut(&self, serial: u64) -> RefMut<'_, PhaseContext> {
        self.check_thread();
        RefMut::map(self.stack.borrow_mut(), |stack| {
            match stack.iter_mut().rfind(|entry| entry.serial == serial) {
                Some(entry) => &mut entry.context,
                None => panic!("phase #{serial} is no longer on the stack"),
            }
        })
    }

    fn pending_block(&self, world: WorldId, cube: Cube) -> Option<BlockState> {
        self.check_thread();
        self.stack
            .borrow()
            .iter()
            .rev()
            .find_map(|entry| entry.context.blocks().latest_for(world, cube).cloned())
    }

    /// Returns the state of the current phase.
    pub fn current_state(&self) -> PhaseState {
        self.top().state()
    }

    /// Returns the number of phases above the idle floor.
    pub fn depth(&self) -> usize {
        self.check_thread();
        self.stack.borrow().len() - 1
    }

    /// Returns the states of all active phases, innermost first, ending with
    /// [`PhaseState::Idle`].
    pub fn states(&self) -> Vec<PhaseState> {
        self.check_thread();
        self.stack
            .borrow()
            .iter()
            .rev()
            .map(|entry| entry.context.state())
            .collect()
    }

    /// Formats the stack for diagnostics, innermost phase first.
    pub fn describe(&self) -> String {
        format!("{self:?}")
    }
}

impl fmt::Debug for PhaseTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Ok(stack) = self.stack.try_borrow() else {
            return f.write_str("phase stack: <in use>");
        };
        writeln!(f, "phase stack ({} deep):", stack.len() - 1)?;
        for entry in stack.iter().rev() {
            let ctx = &entry.context;
            let [blocks, spawns, drops] = ctx.capture_counts();
            write!(f, "  #{} {}", entry.serial, ctx.state())?;
            if let Some(world) = ctx.target_world() {
                write!(f, " in {world}")?;
            }
            writeln!(f, " (captured {blocks} blocks, {spawns} spawns, {drops} drops)")?;
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Guard for an active phase, returned by [`TrackingSession::enter()`].
///
/// Release it with [`PhaseGuard::close()`], which runs the state's [`UnwindAction`], or
/// let [`TrackingSession::scope()`] do that.
/// If it is dropped during a panic, the phase is popped and its captures are discarded
/// without ever reaching the world. Dropping it otherwise while it holds captures is a
/// scope-discipline violation and panics.
#[must_use = "the phase ends when the guard is dropped"]
pub struct PhaseGuard<'s> {
    session: &'s TrackingSession,
    serial: u64,
    closed: bool,
}

impl PhaseGuard<'_> {
    /// Returns the state of this guard's phase.
    pub fn state(&self) -> PhaseState {
        self.context_mut(|ctx| ctx.state())
    }

    /// Calls `f` with this guard's context. `f` must not call back into the session.
    pub fn context_mut<R>(&self, f: impl FnOnce(&mut PhaseContext) -> R) -> R {
        f(&mut self.session.phases.entry_mut(self.serial))
    }

    /// Removes and returns this phase's captured block changes, so that the caller can
    /// decide their fate instead of the unwind action.
    pub fn take_block_captures(&self) -> Captures<BlockChange> {
        Captures::from(self.context_mut(|ctx| ctx.blocks_mut().take_all()))
    }

    /// Ends the phase, running its state's [`UnwindAction`] on its remaining captures.
    ///
    /// Panics if this is not the innermost phase, or if the state is defined never to
    /// capture and captures are present.
    #[track_caller]
    pub fn close(mut self, worlds: &mut dyn WorldAccess, bus: &mut dyn EventBus) -> UnwindOutcome {
        self.closed = true;
        let session = self.session;
        let mut context = session.phases.pop(self.serial);
        let state = context.state();
        log::trace!("unwind {state}");
        match state.unwind_action() {
            UnwindAction::Flush => tracking::flush_context(session, &mut context, worlds, bus),
            UnwindAction::Discard => {
                let discarded = context.restore_all(worlds);
                if discarded > 0 {
                    log::debug!("{state} discarded {discarded} captures");
                }
                UnwindOutcome {
                    discarded,
                    ..UnwindOutcome::new(state)
                }
            }
            UnwindAction::AssertEmpty => {
                if context.has_captures() {
                    let [blocks, spawns, drops] = context.capture_counts();
                    panic!(
                        "{state} never captures, but ended holding {blocks} blocks, \
                         {spawns} spawns, {drops} drops\n{}",
                        session.phases.describe()
                    );
                }
                UnwindOutcome::new(state)
            }
        }
    }
}

impl fmt::Debug for PhaseGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseGuard")
            .field("serial", &self.serial)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let context = if thread::panicking() {
            match self.session.phases.pop_during_panic(self.serial) {
                Some(context) => context,
                None => return,
            }
        } else {
            self.session.phases.pop(self.serial)
        };
        let state = context.state();
        if !context.has_captures() {
            log::trace!("unwind {state} (dropped)");
        } else if thread::panicking() {
            let [blocks, spawns, drops] = context.capture_counts();
            log::warn!("{state} unwound; discarding {blocks} blocks, {spawns} spawns, {drops} drops");
        } else {
            let [blocks, spawns, drops] = context.capture_counts();
            panic!(
                "{state} was dropped without being closed, losing {blocks} blocks, \
                 {spawns} spawns, {drops} drops; close it or use TrackingSession::scope()\n{}",
                self.session.phases.describe()
            );
        }
    }
}
