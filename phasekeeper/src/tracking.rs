//! Turning captured mutations into events, and events into world changes.
//!
//! This is the only place where bulk-captured mutations are written to the world.

use crate::capture::{BlockChange, Captures, Restore as _};
use crate::cause::{CauseObject, ContextKey, ContextValue, SpawnType};
use crate::entity::Entity;
use crate::event::{
    BlockTransaction, Cancellable as _, ChangeBlockEvent, DropItemEvent, EventBus, EventMut,
    SpawnEntityEvent,
};
use crate::phase::{CaptureKind, PhaseContext, PhaseState};
use crate::tracker::TrackingSession;
use crate::world::{WorldAccess, WorldId};

#[cfg(test)]
mod tests;

/// What happened to a phase's captures when it ended.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct UnwindOutcome {
    /// The state of the phase which ended.
    pub state: PhaseState,
    /// Whether the captured block batch was accepted, or [`None`] if there was none.
    pub blocks_accepted: Option<bool>,
    /// Number of captured entities attached to worlds.
    pub entities_spawned: usize,
    /// Number of captured items attached to worlds.
    pub items_dropped: usize,
    /// Number of captures discarded without publishing.
    pub discarded: usize,
}

impl UnwindOutcome {
    pub(crate) fn new(state: PhaseState) -> Self {
        Self {
            state,
            blocks_accepted: None,
            entities_spawned: 0,
            items_dropped: 0,
            discarded: 0,
        }
    }
}

/// Publishes and commits everything `context` captured, in its state's flush order.
///
/// The context's source, if any, is pushed as the root cause of every event, and its
/// notifier and owner are added as context.
pub fn flush_context(
    session: &TrackingSession,
    context: &mut PhaseContext,
    worlds: &mut dyn WorldAccess,
    bus: &mut dyn EventBus,
) -> UnwindOutcome {
    let state = context.state();
    let mut outcome = UnwindOutcome::new(state);
    if !context.has_captures() {
        return outcome;
    }

    let frame = session.causes().push_frame();
    if let Some(source) = context.source() {
        frame.push_cause(source.clone());
    }
    if let Some(notifier) = context.notifier() {
        frame.add_context(ContextKey::Notifier, ContextValue::Object(notifier.clone()));
    }
    if let Some(owner) = context.owner() {
        frame.add_context(ContextKey::Owner, ContextValue::Object(owner.clone()));
    }

    for kind in state.flush_order() {
        match kind {
            CaptureKind::Blocks => {
                if !context.blocks().is_empty() {
                    outcome.blocks_accepted =
                        Some(process_block_captures(session, context, worlds, bus));
                }
            }
            CaptureKind::ItemDrops => {
                outcome.items_dropped += process_drop_captures(session, context, worlds, bus);
            }
            CaptureKind::EntitySpawns => {
                outcome.entities_spawned += process_spawn_captures(session, context, worlds, bus);
            }
        }
    }
    drop(frame);

    log::debug!(
        "flushed {state}: blocks accepted {:?}, {} spawned, {} dropped",
        outcome.blocks_accepted,
        outcome.entities_spawned,
        outcome.items_dropped
    );
    outcome
}

/// Publishes `context`'s captured block changes and commits or rolls them back.
///
/// Returns whether the changes were accepted. Individually vetoed changes do not make
/// the batch rejected, unless the state is [fully cancellable](PhaseState::fully_cancellable).
pub fn process_block_captures(
    session: &TrackingSession,
    context: &mut PhaseContext,
    worlds: &mut dyn WorldAccess,
    bus: &mut dyn EventBus,
) -> bool {
    let mut captures = Captures::from(context.blocks_mut().take_all());
    commit_block_changes(
        session,
        &mut captures,
        context.state().fully_cancellable(),
        worlds,
        bus,
    )
}

/// Publishes one [`ChangeBlockEvent`] per world for the changes in `captures`, then
/// writes the accepted ones and restores the rest. Empties `captures`.
///
/// Returns false if any world's batch was cancelled as a whole.
pub fn commit_block_changes(
    session: &TrackingSession,
    captures: &mut Captures<BlockChange>,
    fully_cancellable: bool,
    worlds: &mut dyn WorldAccess,
    bus: &mut dyn EventBus,
) -> bool {
    let mut all_accepted = true;
    for (world, changes) in group_by_key(captures.take_all(), |change| change.world) {
        all_accepted &= commit_world_batch(session, world, changes, fully_cancellable, worlds, bus);
    }
    all_accepted
}

fn commit_world_batch(
    session: &TrackingSession,
    world: WorldId,
    changes: Vec<BlockChange>,
    fully_cancellable: bool,
    worlds: &mut dyn WorldAccess,
    bus: &mut dyn EventBus,
) -> bool {
    let mut event = ChangeBlockEvent::new(
        session.causes().current_cause(),
        world,
        changes.iter().map(BlockTransaction::new).collect(),
        fully_cancellable,
    );
    let cancelled = bus.post(EventMut::ChangeBlock(&mut event)) || event.is_cancelled();
    let any_vetoed = event.transactions().iter().any(|t| !t.is_valid());

    if cancelled || (fully_cancellable && any_vetoed) {
        log::debug!(
            "block batch of {} in {world} rejected{}",
            changes.len(),
            if cancelled { "" } else { " by a veto" }
        );
        Captures::from(changes).restore_originals(worlds);
        return false;
    }

    let mut vetoed = Vec::new();
    for (transaction, change) in event.into_transactions().into_iter().zip(changes) {
        if transaction.is_valid() {
            let state = transaction.final_replacement().clone();
            worlds.set_block_state(world, transaction.cube(), state);
        } else {
            vetoed.push(change);
        }
    }
    if !vetoed.is_empty() {
        log::debug!("{} vetoed block changes in {world} left unapplied", vetoed.len());
        for change in vetoed.into_iter().rev() {
            change.restore(worlds);
        }
    }
    true
}

/// Publishes `context`'s captured entity spawns, one [`SpawnEntityEvent`] per owner,
/// and attaches the entities listeners kept.
///
/// Returns the number of entities attached.
pub fn process_spawn_captures(
    session: &TrackingSession,
    context: &mut PhaseContext,
    worlds: &mut dyn WorldAccess,
    bus: &mut dyn EventBus,
) -> usize {
    let spawns = context.spawns_mut().take_all();
    let mut spawned = 0;
    for (owner, entities) in group_by_key(
        spawns.into_iter().map(|s| (s.owner, s.entity)).collect(),
        |(owner, _)| owner.clone(),
    ) {
        let entities: Vec<Entity> = entities.into_iter().map(|(_, e)| e).collect();
        let frame = session.causes().push_frame();
        if let Some(owner) = owner {
            frame
                .push_cause(owner.clone())
                .add_context(ContextKey::Owner, ContextValue::Object(owner));
        }
        frame.add_context(ContextKey::SpawnType, ContextValue::SpawnType(SpawnType::Passive));

        let mut event = SpawnEntityEvent::new(session.causes().current_cause(), entities);
        let cancelled = bus.post(EventMut::SpawnEntity(&mut event)) || event.is_cancelled();
        drop(frame);
        if cancelled {
            log::debug!("spawn of {} entities cancelled", event.entities().len());
            continue;
        }
        spawned += attach_all(worlds, event.into_entities());
    }
    spawned
}

/// Publishes `context`'s captured item drops, one [`DropItemEvent`] per owner, and
/// attaches the items listeners kept.
///
/// Returns the number of items attached.
pub fn process_drop_captures(
    session: &TrackingSession,
    context: &mut PhaseContext,
    worlds: &mut dyn WorldAccess,
    bus: &mut dyn EventBus,
) -> usize {
    let drops = context.drops_mut().take_all();
    let mut dropped = 0;
    for (owner, items) in group_by_key(
        drops.into_iter().map(|d| (d.owner, d.item)).collect(),
        |(owner, _)| owner.clone(),
    ) {
        let items: Vec<Entity> = items.into_iter().map(|(_, e)| e).collect();
        let frame = session.causes().push_frame();
        if let Some(owner) = owner {
            frame
                .push_cause(owner.clone())
                .add_context(ContextKey::Owner, ContextValue::Object(owner));
        }
        frame.add_context(ContextKey::SpawnType, ContextValue::SpawnType(SpawnType::DropItem));

        let mut event = DropItemEvent::new(session.causes().current_cause(), items);
        let cancelled = bus.post(EventMut::DropItem(&mut event)) || event.is_cancelled();
        drop(frame);
        if cancelled {
            log::debug!("drop of {} items cancelled", event.items().len());
            continue;
        }
        dropped += attach_all(worlds, event.into_items());
    }
    dropped
}

fn attach_all(worlds: &mut dyn WorldAccess, entities: Vec<Entity>) -> usize {
    let mut attached = 0;
    for entity in entities {
        let id = entity.id();
        match worlds.spawn_entity(entity.world(), entity) {
            Ok(()) => attached += 1,
            Err(entity) => log::debug!("could not attach {id} to {}", entity.world()),
        }
    }
    attached
}

/// Groups items by key, preserving the order in which keys first appear and the order
/// of items within each group.
fn group_by_key<T, K: PartialEq>(items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<(K, Vec<T>)> {
    let mut groups: Vec<(K, Vec<T>)> = Vec::new();
    for item in items {
        let k = key(&item);
        match groups.iter_mut().find(|(gk, _)| *gk == k) {
            Some((_, group)) => group.push(item),
            None => groups.push((k, vec![item])),
        }
    }
    groups
}

/// Returns the owner to attribute a capture to in the current phase.
pub(crate) fn owner_of(context: &PhaseContext) -> Option<CauseObject> {
    context.owner().or(context.source()).cloned()
}
