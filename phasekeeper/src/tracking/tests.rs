use pretty_assertions::assert_eq;
use rstest::rstest;

use super::*;
use crate::capture::CapturedSpawn;
use crate::entity::{EntityId, EntityKind};
use crate::event::{Cancellable, EventKind};
use crate::math::{Cube, FreePoint};
use crate::phase::{BlockPhase, EntityPhase, PacketPhase, TickPhase};
use crate::testing::ScriptedBus;
use crate::tracker::{SpawnOutcome, TrackingSession};
use crate::transform::Transform;
use crate::world::{BlockState, DimensionKind, Universe};

const P: [Cube; 3] = [Cube::new(1, 64, 0), Cube::new(2, 64, 0), Cube::new(3, 64, 0)];

fn old_states() -> [BlockState; 3] {
    ["minecraft:dirt", "minecraft:sand", "minecraft:gravel"].map(BlockState::new)
}

fn new_states() -> [BlockState; 3] {
    ["minecraft:stone", "minecraft:glass", "minecraft:oak_planks"].map(BlockState::new)
}

fn world_with_old_states() -> (Universe, WorldId) {
    let mut u = Universe::new();
    let w = u.create_simple_world("overworld", DimensionKind::Overworld);
    for (cube, state) in P.into_iter().zip(old_states()) {
        u.set_block_state(w, cube, state);
    }
    (u, w)
}

fn states_at(u: &Universe, w: WorldId) -> Vec<BlockState> {
    P.iter().map(|&cube| u.block_state(w, cube).unwrap()).collect()
}

/// Captures the three changes in a phase of the given state, then closes it with `bus`.
fn run_three_changes(state: PhaseState, bus: &mut ScriptedBus) -> (Universe, WorldId, UnwindOutcome) {
    let (mut u, w) = world_with_old_states();
    let session = TrackingSession::new();
    let guard = session.enter(PhaseContext::new(state).with_target_world(w));
    for (cube, state) in P.into_iter().zip(new_states()) {
        session.set_block(&mut u, w, cube, state);
    }
    assert_eq!(states_at(&u, w), old_states().to_vec());
    let outcome = guard.close(&mut u, bus);
    (u, w, outcome)
}

fn veto_cube(cube: Cube) -> impl FnMut(&mut EventMut<'_>) {
    move |event| {
        if let EventMut::ChangeBlock(e) = event {
            e.filter(|t| t.cube() != cube);
        }
    }
}

#[test]
fn reject_batch_leaves_originals() {
    let mut bus = ScriptedBus::new().cancelling(EventKind::ChangeBlock);
    let (u, w, outcome) = run_three_changes(PhaseState::Tick(TickPhase::Block), &mut bus);
    assert_eq!(states_at(&u, w), old_states().to_vec());
    assert_eq!(outcome.blocks_accepted, Some(false));
    assert_eq!(bus.kinds(), vec![EventKind::ChangeBlock]);
}

#[test]
fn accept_batch_applies_all() {
    let mut bus = ScriptedBus::new();
    let (u, w, outcome) = run_three_changes(PhaseState::Tick(TickPhase::Block), &mut bus);
    assert_eq!(states_at(&u, w), new_states().to_vec());
    assert_eq!(outcome.blocks_accepted, Some(true));
}

#[test]
fn veto_one_applies_the_rest() {
    let mut bus = ScriptedBus::new().listen(veto_cube(P[1]));
    let (u, w, outcome) = run_three_changes(PhaseState::Tick(TickPhase::Block), &mut bus);
    let [n1, _, n3] = new_states();
    let [_, a2, _] = old_states();
    assert_eq!(states_at(&u, w), vec![n1, a2, n3]);
    assert_eq!(outcome.blocks_accepted, Some(true));
}

#[test]
fn veto_one_discards_fully_cancellable_batch() {
    let mut bus = ScriptedBus::new().listen(veto_cube(P[1]));
    let (u, w, outcome) = run_three_changes(PhaseState::Block(BlockPhase::Decay), &mut bus);
    assert_eq!(states_at(&u, w), old_states().to_vec());
    assert_eq!(outcome.blocks_accepted, Some(false));
}

/// Every subset of vetoed transactions leaves exactly the others applied.
#[rstest]
fn partial_commit_is_exact(#[values(0b000, 0b001, 0b010, 0b011, 0b100, 0b101, 0b110, 0b111)] vetoes: u8) {
    let mut bus = ScriptedBus::new().listen(move |event| {
        if let EventMut::ChangeBlock(e) = event {
            for (i, t) in e.transactions_mut().iter_mut().enumerate() {
                if vetoes & (1 << i) != 0 {
                    t.invalidate();
                }
            }
        }
    });
    let (u, w, _) = run_three_changes(PhaseState::Packet(PacketPhase::Interaction), &mut bus);
    let expected: Vec<BlockState> = (0..3)
        .map(|i| {
            if vetoes & (1 << i) != 0 {
                old_states()[i].clone()
            } else {
                new_states()[i].clone()
            }
        })
        .collect();
    assert_eq!(states_at(&u, w), expected);
}

#[test]
fn custom_replacement_is_written() {
    let mut bus = ScriptedBus::new().listen(|event| {
        if let EventMut::ChangeBlock(e) = event {
            e.transactions_mut()[0].set_custom(BlockState::new("minecraft:diamond_block"));
        }
    });
    let (u, w, _) = run_three_changes(PhaseState::Tick(TickPhase::Block), &mut bus);
    assert_eq!(
        u.block_state(w, P[0]),
        Some(BlockState::new("minecraft:diamond_block"))
    );
}

#[test]
fn one_event_per_world() {
    let mut u = Universe::new();
    let a = u.create_simple_world("a", DimensionKind::Overworld);
    let b = u.create_simple_world("b", DimensionKind::Nether);
    let session = TrackingSession::new();
    let mut bus = ScriptedBus::new().listen(move |event| {
        if let EventMut::ChangeBlock(e) = event {
            if e.world() == b {
                e.set_cancelled(true);
            }
        }
    });

    let guard = session.enter(PhaseContext::new(PhaseState::Plugin(
        crate::phase::PluginPhase::BlockWorker,
    )));
    session.set_block(&mut u, a, Cube::ORIGIN, BlockState::new("minecraft:stone"));
    session.set_block(&mut u, b, Cube::ORIGIN, BlockState::new("minecraft:netherrack"));
    session.set_block(&mut u, a, Cube::new(1, 0, 0), BlockState::new("minecraft:stone"));
    let outcome = guard.close(&mut u, &mut bus);

    assert_eq!(bus.kinds(), vec![EventKind::ChangeBlock, EventKind::ChangeBlock]);
    assert_eq!(u.non_air_count(a), 2);
    assert_eq!(u.non_air_count(b), 0);
    assert_eq!(outcome.blocks_accepted, Some(false));
}

#[test]
fn source_is_root_cause_with_owner_context() {
    let (mut u, w) = world_with_old_states();
    let session = TrackingSession::new();
    session.causes().push_cause(CauseObject::Server);
    let mut bus = ScriptedBus::new();
    let guard = session.enter(
        PhaseContext::new(PhaseState::Packet(PacketPhase::Placement))
            .with_source(CauseObject::Player(EntityId(9)))
            .with_notifier(CauseObject::Player(EntityId(9)))
            .with_owner(CauseObject::Player(EntityId(9))),
    );
    session.set_block(&mut u, w, P[0], BlockState::new("minecraft:torch"));
    guard.close(&mut u, &mut bus);

    let cause = &bus.log()[0].cause;
    assert_eq!(cause.root(), Some(&CauseObject::Player(EntityId(9))));
    assert_eq!(cause.frames().len(), 2);
    assert_eq!(
        cause.context_object(ContextKey::Notifier),
        Some(&CauseObject::Player(EntityId(9)))
    );
    // The flush frame is gone afterward.
    assert_eq!(session.causes().depth(), 1);
}

fn prepared_entity(u: &mut Universe, w: WorldId, kind: EntityKind) -> Entity {
    let transform = Transform::new(w, FreePoint::new(8.5, 64.0, 8.5));
    u.load_or_generate_chunk(w, transform.chunk().unwrap());
    Entity::new(u.allocate_entity_id(), kind, transform)
}

#[test]
fn spawns_grouped_by_owner_and_filtered() {
    let mut u = Universe::new();
    let w = u.create_simple_world("w", DimensionKind::Overworld);
    let session = TrackingSession::new();
    let zombie = EntityKind::new("minecraft:zombie");
    let mut bus = ScriptedBus::new().listen(move |event| {
        if let EventMut::SpawnEntity(e) = event {
            e.filter_entities(|entity| *entity.kind() != zombie);
        }
    });

    let mut ctx = PhaseContext::new(PhaseState::Tick(TickPhase::Entity));
    let mut spawned = Vec::new();
    for (owner, kind) in [
        (1, "minecraft:pig"),
        (2, "minecraft:zombie"),
        (1, "minecraft:cow"),
    ] {
        let entity = prepared_entity(&mut u, w, EntityKind::new(kind));
        spawned.push(entity.id());
        ctx.spawns_mut().capture(CapturedSpawn {
            entity,
            owner: Some(CauseObject::Entity(EntityId(1000 + owner))),
        });
    }
    let count = process_spawn_captures(&session, &mut ctx, &mut u, &mut bus);

    assert_eq!(bus.kinds(), vec![EventKind::SpawnEntity, EventKind::SpawnEntity]);
    assert_eq!(
        bus.log()[0].cause.root(),
        Some(&CauseObject::Entity(EntityId(1001)))
    );
    assert_eq!(count, 2);
    assert_eq!(u.locate_entity(spawned[0]), Some(w));
    assert_eq!(u.locate_entity(spawned[1]), None);
    assert_eq!(u.locate_entity(spawned[2]), Some(w));
}

#[test]
fn cancelled_drop_spawns_nothing() {
    let mut u = Universe::new();
    let w = u.create_simple_world("w", DimensionKind::Overworld);
    let session = TrackingSession::new();
    let mut bus = ScriptedBus::new().cancelling(EventKind::DropItem);

    let guard = session.enter(PhaseContext::new(PhaseState::Block(BlockPhase::BlockDrops)));
    let item = prepared_entity(&mut u, w, EntityKind::ITEM);
    let id = item.id();
    assert_eq!(session.drop_item(&mut u, item), SpawnOutcome::Captured);
    let outcome = guard.close(&mut u, &mut bus);

    assert_eq!(outcome.items_dropped, 0);
    assert_eq!(u.locate_entity(id), None);
    assert_eq!(
        bus.log()[0].cause.context(ContextKey::SpawnType),
        Some(&ContextValue::SpawnType(SpawnType::DropItem))
    );
}

#[test]
fn death_flushes_drops_before_blocks() {
    let (mut u, w) = world_with_old_states();
    let session = TrackingSession::new();
    let mut bus = ScriptedBus::new();

    let victim = CauseObject::Entity(EntityId(50));
    let guard = session.enter(
        PhaseContext::new(PhaseState::Entity(EntityPhase::Death)).with_source(victim),
    );
    session.set_block(&mut u, w, P[0], BlockState::new("minecraft:wither_rose"));
    let item = prepared_entity(&mut u, w, EntityKind::ITEM);
    session.drop_item(&mut u, item);
    let outcome = guard.close(&mut u, &mut bus);

    assert_eq!(bus.kinds(), vec![EventKind::DropItem, EventKind::ChangeBlock]);
    assert_eq!(outcome.items_dropped, 1);
    assert_eq!(outcome.blocks_accepted, Some(true));
}

#[test]
fn nothing_captured_posts_nothing() {
    let mut u = Universe::new();
    let session = TrackingSession::new();
    let mut bus = ScriptedBus::new();
    let guard = session.enter(PhaseContext::new(PhaseState::Tick(TickPhase::Entity)));
    let outcome = guard.close(&mut u, &mut bus);
    assert_eq!(outcome, UnwindOutcome::new(PhaseState::Tick(TickPhase::Entity)));
    assert!(bus.log().is_empty());
}
