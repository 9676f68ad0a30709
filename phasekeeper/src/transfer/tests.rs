use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::json;

use super::*;
use crate::archetype::MaterializeError;
use crate::cause::Cause;
use crate::entity::EntityKind;
use crate::event::{Cancellable as _, EventKind};
use crate::testing::ScriptedBus;
use crate::world::{BlockState, Universe, WorldInfo};

const PORTAL_BLOCKS: [Cube; 2] = [Cube::new(1, 64, 1), Cube::new(1, 65, 1)];

/// A portal agent which places obsidian at fixed cubes and optionally picks an exit.
#[derive(Debug, Default)]
struct FramingAgent {
    blocks: Vec<Cube>,
    exit: Option<FreePoint>,
    /// Also moves the subject itself, as some agents do.
    nudges_subject: bool,
    calls: usize,
    forgotten: Vec<(WorldId, Cube)>,
}

impl FramingAgent {
    fn portal() -> Self {
        Self {
            blocks: PORTAL_BLOCKS.to_vec(),
            exit: Some(FreePoint::new(1.5, 64.0, 2.5)),
            ..Self::default()
        }
    }
}

impl PortalAgent for FramingAgent {
    fn name(&self) -> ArcStr {
        arcstr::literal!("test:frame")
    }

    fn place_entity(
        &mut self,
        session: &TrackingSession,
        worlds: &mut dyn WorldAccess,
        subject: &Entity,
        destination: WorldId,
        default_exit: Transform,
    ) -> Option<Transform> {
        self.calls += 1;
        for &cube in &self.blocks {
            session.set_block(worlds, destination, cube, BlockState::new("minecraft:obsidian"));
        }
        if self.nudges_subject {
            if let Some(entity) = worlds.entity_mut(subject.world(), subject.id()) {
                entity.set_transform(subject.transform().with_position(FreePoint::new(0.0, 0.0, 0.0)));
            }
        }
        self.exit.map(|p| default_exit.with_position(p))
    }

    fn forget_portal(&mut self, world: WorldId, cube: Cube) {
        self.forgotten.push((world, cube));
    }
}

#[derive(Debug, Default)]
struct RecordingHooks(Vec<(EntityId, WorldId, WorldId)>);

impl TransferHooks for RecordingHooks {
    fn entity_transferred(&mut self, entity: EntityId, from: WorldId, to: WorldId) {
        self.0.push((entity, from, to));
    }
}

#[derive(Debug, Default)]
struct RecordingPlayer {
    packets: Vec<ClientSyncPacket>,
    player_list: Vec<(EntityId, WorldId)>,
    advancements: Vec<(DimensionKind, DimensionKind)>,
}

impl PlayerSession for RecordingPlayer {
    fn send(&mut self, _: EntityId, packet: ClientSyncPacket) {
        self.packets.push(packet);
    }

    fn update_player_list(&mut self, player: EntityId, world: WorldId) {
        self.player_list.push((player, world));
    }

    fn trigger_dimension_advancement(&mut self, _: EntityId, from: DimensionKind, to: DimensionKind) {
        self.advancements.push((from, to));
    }
}

struct Scenario {
    universe: Universe,
    overworld: WorldId,
    nether: WorldId,
    end: WorldId,
    session: TrackingSession,
    registry: EntityRegistry,
    hooks: RecordingHooks,
}

impl Scenario {
    fn new() -> Self {
        let mut universe = Universe::new();
        let overworld = universe.create_simple_world("overworld", DimensionKind::Overworld);
        let nether = universe.create_simple_world("nether", DimensionKind::Nether);
        let end = universe.create_simple_world("end", DimensionKind::End);
        let mut registry = EntityRegistry::with_defaults();
        registry.register(
            pig(),
            EntityRegistry::standard_constructor,
            TransferStrategy::Relocate,
        );
        Self {
            universe,
            overworld,
            nether,
            end,
            session: TrackingSession::new(),
            registry,
            hooks: RecordingHooks::default(),
        }
    }

    /// Adds a moving pig to the overworld.
    fn add_pig(&mut self, position: FreePoint) -> EntityId {
        let id = self.universe.add_entity(self.overworld, pig(), position);
        let entity = self.universe.entity_mut(self.overworld, id).unwrap();
        entity.set_velocity(FreeVector::new(0.25, 0.0, 0.0));
        entity.set_data("Saddle", json!(true));
        id
    }

    fn collaborators<'a>(&'a mut self, bus: &'a mut ScriptedBus) -> Collaborators<'a> {
        Collaborators {
            session: &self.session,
            worlds: &mut self.universe,
            bus,
            registry: &self.registry,
            hooks: &mut self.hooks,
        }
    }

    fn transfer(
        &mut self,
        bus: &mut ScriptedBus,
        agent: &mut dyn PortalAgent,
        entity: EntityId,
        destination: WorldId,
    ) -> Option<TransferOutcome> {
        transfer_entity(&mut self.collaborators(bus), entity, destination, agent, None)
    }

    fn entity(&self, id: EntityId) -> &Entity {
        let world = self.universe.locate_entity(id).unwrap();
        self.universe.entity(world, id).unwrap()
    }

    /// Number of worlds `id` is attached to.
    fn attachments(&self, id: EntityId) -> usize {
        [self.overworld, self.nether, self.end]
            .into_iter()
            .filter(|&w| self.universe.entity_ids(w).contains(&id))
            .count()
    }

    fn assert_balanced(&self) {
        assert_eq!(self.session.depth(), 0);
        assert_eq!(self.session.causes().depth(), 0);
        assert_eq!(self.session.causes().frame_depth(), 0);
    }
}

fn pig() -> EntityKind {
    EntityKind::new("minecraft:pig")
}

fn t1_position() -> FreePoint {
    FreePoint::new(10.5, 64.0, 10.5)
}

#[test]
fn cancelled_teleport_reverts_agent_blocks_and_transform() {
    let mut s = Scenario::new();
    let subject = s.add_pig(t1_position());
    let t1 = s.entity(subject).transform();
    let mut agent = FramingAgent {
        nudges_subject: true,
        ..FramingAgent::portal()
    };
    let mut bus = ScriptedBus::new().cancelling(EventKind::PortalTeleport);

    let outcome = s.transfer(&mut bus, &mut agent, subject, s.nether);

    assert_eq!(
        outcome,
        Some(TransferOutcome::NotTransferred {
            entity: subject,
            world: s.overworld,
            reason: NotTransferredReason::Cancelled,
        })
    );
    assert_eq!(s.entity(subject).transform(), t1);
    assert_eq!(s.entity(subject).velocity(), FreeVector::new(0.25, 0.0, 0.0));
    assert_eq!(s.universe.non_air_count(s.nether), 0);
    assert_eq!(s.universe.chunk_load_count(s.nether), 0);
    assert_eq!(agent.forgotten, vec![(s.nether, Cube::new(1, 64, 2))]);
    assert_eq!(bus.kinds(), vec![EventKind::PortalTeleport]);
    assert_eq!(s.attachments(subject), 1);
    assert!(s.hooks.0.is_empty());
    s.assert_balanced();
}

#[test]
fn accepted_teleport_commits_blocks_and_moves() {
    let mut s = Scenario::new();
    let subject = s.add_pig(t1_position());
    let mut agent = FramingAgent::portal();
    let mut bus = ScriptedBus::new();

    let outcome = s.transfer(&mut bus, &mut agent, subject, s.nether);

    assert_eq!(
        outcome,
        Some(TransferOutcome::Transferred {
            entity: subject,
            from: s.overworld,
            to: s.nether,
        })
    );
    assert_eq!(s.universe.locate_entity(subject), Some(s.nether));
    assert_eq!(s.attachments(subject), 1);
    let arrived = s.entity(subject);
    assert_eq!(arrived.transform().position(), FreePoint::new(1.5, 64.0, 2.5));
    assert_eq!(arrived.velocity(), FreeVector::zero());
    assert_eq!(arrived.data().get("Saddle"), Some(&json!(true)));

    assert_eq!(s.universe.non_air_count(s.nether), 2);
    // Committing the portal loaded the arrival chunk; it is not loaded a second time.
    assert_eq!(s.universe.chunk_load_count(s.nether), 1);
    assert_eq!(bus.kinds(), vec![EventKind::PortalTeleport, EventKind::ChangeBlock]);

    let teleport_cause = &bus.log()[0].cause;
    assert_eq!(
        teleport_cause.frames(),
        &[
            CauseObject::PortalAgent(arcstr::literal!("test:frame")),
            CauseObject::Entity(subject),
        ]
    );
    assert_eq!(teleport_cause.teleport_type(), Some(TeleportType::Portal));
    assert_eq!(
        bus.log()[1].cause.root(),
        Some(&CauseObject::PortalAgent(arcstr::literal!("test:frame")))
    );

    assert_eq!(s.hooks.0, vec![(subject, s.overworld, s.nether)]);
    assert!(agent.forgotten.is_empty());
    s.assert_balanced();
}

#[test]
fn keep_velocity_is_honored() {
    let mut s = Scenario::new();
    let subject = s.add_pig(t1_position());
    let mut bus = ScriptedBus::new().listen(|event| {
        if let EventMut::PortalTeleport(e) = event {
            e.set_keep_velocity(true);
        }
    });
    s.transfer(&mut bus, &mut FramingAgent::portal(), subject, s.nether);
    assert_eq!(s.entity(subject).velocity(), FreeVector::new(0.25, 0.0, 0.0));
}

#[test]
fn declining_portal_agent_discards_blocks_only() {
    let mut s = Scenario::new();
    let subject = s.add_pig(t1_position());
    let mut agent = FramingAgent::portal();
    let mut bus = ScriptedBus::new().listen(|event| {
        if let EventMut::PortalTeleport(e) = event {
            e.set_use_portal_agent(false);
        }
    });

    let outcome = s.transfer(&mut bus, &mut agent, subject, s.nether).unwrap();

    assert!(outcome.is_transferred());
    assert_eq!(s.universe.locate_entity(subject), Some(s.nether));
    assert_eq!(s.universe.non_air_count(s.nether), 0);
    assert_eq!(bus.kinds(), vec![EventKind::PortalTeleport]);
    assert_eq!(agent.forgotten, vec![(s.nether, Cube::new(1, 64, 2))]);
    s.assert_balanced();
}

#[test]
fn redirect_to_other_world_is_a_cancellation() {
    let mut s = Scenario::new();
    let subject = s.add_pig(t1_position());
    let end = s.end;
    let mut bus = ScriptedBus::new().listen(move |event| {
        if let EventMut::PortalTeleport(e) = event {
            let to = e.to();
            e.set_to(to.with_world(end));
        }
    });

    let outcome = s
        .transfer(&mut bus, &mut FramingAgent::portal(), subject, s.nether)
        .unwrap();

    assert_eq!(
        outcome,
        TransferOutcome::NotTransferred {
            entity: subject,
            world: s.overworld,
            reason: NotTransferredReason::Redirected,
        }
    );
    assert_eq!(s.universe.non_air_count(s.nether), 0);
    assert!(s.universe.entity_ids(s.end).is_empty());
    assert_eq!(s.attachments(subject), 1);
    s.assert_balanced();
}

#[test]
fn rejected_portal_blocks_abort_transfer() {
    let mut s = Scenario::new();
    let subject = s.add_pig(t1_position());
    let mut bus = ScriptedBus::new().cancelling(EventKind::ChangeBlock);

    let outcome = s
        .transfer(&mut bus, &mut FramingAgent::portal(), subject, s.nether)
        .unwrap();

    assert_eq!(outcome.world(), s.overworld);
    assert!(matches!(
        outcome,
        TransferOutcome::NotTransferred {
            reason: NotTransferredReason::BlockCommitRejected,
            ..
        }
    ));
    assert_eq!(s.universe.non_air_count(s.nether), 0);
    assert_eq!(s.universe.locate_entity(subject), Some(s.overworld));
    s.assert_balanced();
}

#[test]
fn declining_agent_uses_scaled_default_exit() {
    let mut s = Scenario::new();
    let subject = s.add_pig(FreePoint::new(80.0, 64.0, -160.0));
    let mut agent = FramingAgent::default();
    let mut bus = ScriptedBus::new();

    s.transfer(&mut bus, &mut agent, subject, s.nether);

    assert_eq!(agent.calls, 1);
    assert_eq!(
        s.entity(subject).transform().position(),
        FreePoint::new(10.0, 64.0, -20.0)
    );
    assert_eq!(s.universe.chunk_load_count(s.nether), 1);
    assert_eq!(bus.kinds(), vec![EventKind::PortalTeleport]);
}

#[rstest]
#[case::overworld_to_nether(DimensionKind::Overworld, [800.0, 70.0, -1600.0], DimensionKind::Nether, [100.0, 70.0, -200.0])]
#[case::nether_to_overworld(DimensionKind::Nether, [100.0, 70.0, -200.0], DimensionKind::Overworld, [800.0, 70.0, -1600.0])]
#[case::clamped_to_border(DimensionKind::Nether, [4_000_000.0, 70.0, -4_000_000.0], DimensionKind::Overworld, [29_999_872.0, 70.0, -29_999_872.0])]
#[case::into_end(DimensionKind::Overworld, [5.0, 70.0, 5.0], DimensionKind::End, [100.5, 50.0, 0.5])]
#[case::out_of_end(DimensionKind::End, [100.5, 50.0, 0.5], DimensionKind::Overworld, [0.5, 64.0, 0.5])]
fn default_exits(
    #[case] from_kind: DimensionKind,
    #[case] from_position: [f64; 3],
    #[case] to_kind: DimensionKind,
    #[case] expected: [f64; 3],
) {
    let mut u = Universe::new();
    let from_world = u.create_world(WorldInfo::new("from", from_kind));
    let to_world = u.create_world(WorldInfo::new("to", to_kind));
    let from = Transform::new(from_world, FreePoint::from(from_position));

    let exit = default_exit(&TransferConfig::default(), &u, from, to_world).unwrap();

    assert_eq!(exit.world(), to_world);
    assert_eq!(exit.position(), FreePoint::from(expected));
}

/// A border that skipped validation yields some exit rather than a panic.
#[rstest]
fn unvalidated_border_does_not_panic(
    #[values(-100.0, 0.0, FreeCoordinate::NAN)] border: FreeCoordinate,
) {
    let mut u = Universe::new();
    let from_world = u.create_world(WorldInfo::new("from", DimensionKind::Overworld));
    let to_world = u.create_world(WorldInfo::new("to", DimensionKind::Nether));
    let config = TransferConfig {
        world_border: border,
        ..TransferConfig::default()
    };
    let from = Transform::new(from_world, FreePoint::new(800.0, 70.0, -1600.0));

    let exit = default_exit(&config, &u, from, to_world).unwrap();

    assert_eq!(exit.world(), to_world);
    assert_eq!(exit.position().y, 70.0);
}

#[test]
fn explicit_event_skips_agent() {
    let mut s = Scenario::new();
    let subject = s.add_pig(t1_position());
    let from = s.entity(subject).transform();
    let to = from
        .with_world(s.nether)
        .with_position(FreePoint::new(-3.5, 80.0, 7.5));
    let event = PortalTeleportEvent::new(
        Cause::of(CauseObject::Plugin(arcstr::literal!("warps"))),
        subject,
        from,
        to,
        None,
    );
    let mut agent = FramingAgent::portal();
    let mut bus = ScriptedBus::new();

    let nether = s.nether;
    let outcome = transfer_entity(
        &mut s.collaborators(&mut bus),
        subject,
        nether,
        &mut agent,
        Some(event),
    );

    assert!(outcome.unwrap().is_transferred());
    assert_eq!(agent.calls, 0);
    assert!(bus.log().is_empty());
    assert_eq!(s.entity(subject).transform(), to);
    s.assert_balanced();
}

#[test]
fn explicit_cancelled_event_does_nothing() {
    let mut s = Scenario::new();
    let subject = s.add_pig(t1_position());
    let from = s.entity(subject).transform();
    let mut event =
        PortalTeleportEvent::new(Cause::of(CauseObject::Server), subject, from, from.with_world(s.nether), None);
    event.set_cancelled(true);
    let mut bus = ScriptedBus::new();

    let nether = s.nether;
    let outcome = transfer_entity(
        &mut s.collaborators(&mut bus),
        subject,
        nether,
        &mut DefaultExit,
        Some(event),
    )
    .unwrap();

    assert_eq!(outcome.world(), s.overworld);
    assert_eq!(s.entity(subject).transform(), from);
    s.assert_balanced();
}

#[test]
fn recreated_entity_keeps_unique_id_and_data() {
    let mut s = Scenario::new();
    s.registry.register(
        pig(),
        EntityRegistry::standard_constructor,
        TransferStrategy::Recreate,
    );
    let subject = s.add_pig(t1_position());
    let unique_id = s.entity(subject).unique_id();
    let mut bus = ScriptedBus::new();

    let outcome = s
        .transfer(&mut bus, &mut DefaultExit, subject, s.nether)
        .unwrap();

    let TransferOutcome::Transferred { entity: new_id, .. } = outcome else {
        panic!("not transferred: {outcome:?}");
    };
    assert_ne!(new_id, subject);
    assert_eq!(s.universe.locate_entity(subject), None);
    assert_eq!(s.attachments(new_id), 1);
    let recreated = s.entity(new_id);
    assert_eq!(recreated.unique_id(), unique_id);
    assert_eq!(recreated.data().get("Saddle"), Some(&json!(true)));
    assert_eq!(recreated.velocity(), FreeVector::zero());
    assert_eq!(s.hooks.0, vec![(new_id, s.overworld, s.nether)]);
}

/// A listener turns the subject around; the recreated entity faces the new way, just as
/// a relocated one would.
#[rstest]
fn exit_rotation_applies_to_either_strategy(
    #[values(TransferStrategy::Relocate, TransferStrategy::Recreate)] strategy: TransferStrategy,
) {
    let mut s = Scenario::new();
    s.registry
        .register(pig(), EntityRegistry::standard_constructor, strategy);
    let subject = s.add_pig(t1_position());
    let turned = FreeVector::new(0.0, 90.0, 0.0);
    let mut bus = ScriptedBus::new().listen(move |event| {
        if let EventMut::PortalTeleport(e) = event {
            let to = e.to();
            e.set_to(to.with_rotation(turned));
        }
    });

    let outcome = s
        .transfer(&mut bus, &mut DefaultExit, subject, s.nether)
        .unwrap();

    assert!(outcome.is_transferred(), "{outcome:?}");
    let arrived = s.entity(outcome.entity());
    assert_eq!(arrived.transform().rotation(), turned);
    assert_eq!(arrived.transform().world(), s.nether);
    assert_eq!(arrived.data().get("Saddle"), Some(&json!(true)));
    s.assert_balanced();
}

#[test]
fn failed_recreation_returns_original() {
    let mut s = Scenario::new();
    let boat = EntityKind::new("minecraft:boat");
    s.registry.register(
        boat.clone(),
        |_, _, _, _| Err(MaterializeError::InvalidData { key: "Motion" }),
        TransferStrategy::Recreate,
    );
    let subject = s.universe.add_entity(s.overworld, boat, t1_position());
    let before = s.entity(subject).clone();
    let mut bus = ScriptedBus::new();

    let outcome = s
        .transfer(&mut bus, &mut DefaultExit, subject, s.nether)
        .unwrap();

    assert_eq!(
        outcome,
        TransferOutcome::NotTransferred {
            entity: subject,
            world: s.overworld,
            reason: NotTransferredReason::MaterializeFailed,
        }
    );
    assert_eq!(s.entity(subject), &before);
    assert_eq!(s.attachments(subject), 1);
    assert!(s.universe.entity_ids(s.nether).is_empty());
    s.assert_balanced();
}

#[test]
fn preconditions() {
    let mut s = Scenario::new();
    let mut bus = ScriptedBus::new();
    let pig_id = s.add_pig(t1_position());
    let player = s
        .universe
        .add_entity(s.overworld, EntityKind::PLAYER, t1_position());
    let removed = s.add_pig(t1_position());
    s.universe
        .entity_mut(s.overworld, removed)
        .unwrap()
        .mark_removed();

    assert_eq!(s.transfer(&mut bus, &mut DefaultExit, EntityId(999), s.nether), None);
    assert_eq!(s.transfer(&mut bus, &mut DefaultExit, removed, s.nether), None);
    assert_eq!(s.transfer(&mut bus, &mut DefaultExit, pig_id, WorldId(42)), None);
    assert_eq!(s.transfer(&mut bus, &mut DefaultExit, player, s.nether), None);
    let nether = s.nether;
    assert_eq!(
        transfer_player(
            &mut s.collaborators(&mut bus),
            pig_id,
            nether,
            &mut DefaultExit,
            None,
            &mut RecordingPlayer::default(),
        ),
        None
    );

    s.universe.world_info_mut(s.overworld).unwrap().authoritative = false;
    assert_eq!(s.transfer(&mut bus, &mut DefaultExit, pig_id, s.nether), None);

    assert!(bus.log().is_empty());
    s.assert_balanced();
}

#[test]
fn player_transfer_replays_client_state() {
    let mut s = Scenario::new();
    let player = s
        .universe
        .add_entity(s.overworld, EntityKind::PLAYER, t1_position());
    {
        let entity = s.universe.entity_mut(s.overworld, player).unwrap();
        entity.set_data("Inventory", json!([{"id": "minecraft:torch", "Count": 3}]));
        entity.set_data("ActiveEffects", json!([{"Id": 1}, {"Id": 16}]));
        entity.set_data("XpLevel", json!(7));
        entity.set_data("XpP", json!(0.5));
    }
    let mut client = RecordingPlayer::default();
    let mut bus = ScriptedBus::new();

    let nether = s.nether;
    let outcome = transfer_player(
        &mut s.collaborators(&mut bus),
        player,
        nether,
        &mut DefaultExit,
        None,
        &mut client,
    )
    .unwrap();

    assert!(outcome.is_transferred());
    let arrived = s.entity(player).transform();
    assert_eq!(
        client.packets,
        vec![
            ClientSyncPacket::Respawn {
                world: s.nether,
                dimension: DimensionKind::Nether
            },
            ClientSyncPacket::Position(arrived),
            ClientSyncPacket::Difficulty(Difficulty::Normal),
            ClientSyncPacket::Abilities(Value::Null),
            ClientSyncPacket::Inventory(json!([{"id": "minecraft:torch", "Count": 3}])),
            ClientSyncPacket::PotionEffect(json!({"Id": 1})),
            ClientSyncPacket::PotionEffect(json!({"Id": 16})),
            ClientSyncPacket::Attributes(Value::Null),
            ClientSyncPacket::Experience {
                level: 7,
                progress: 0.5,
                total: 0
            },
        ]
    );
    assert_eq!(client.player_list, vec![(player, s.nether)]);
    assert_eq!(
        client.advancements,
        vec![(DimensionKind::Overworld, DimensionKind::Nether)]
    );
    assert_eq!(
        bus.log()[0].cause.frames(),
        &[
            CauseObject::PortalAgent(arcstr::literal!("default")),
            CauseObject::Player(player),
        ]
    );
    s.assert_balanced();
}

#[test]
fn players_are_relocated_even_if_registered_for_recreation() {
    let mut s = Scenario::new();
    s.registry.register(
        EntityKind::PLAYER,
        EntityRegistry::standard_constructor,
        TransferStrategy::Recreate,
    );
    let player = s
        .universe
        .add_entity(s.overworld, EntityKind::PLAYER, t1_position());
    let mut bus = ScriptedBus::new();

    let end = s.end;
    let outcome = transfer_player(
        &mut s.collaborators(&mut bus),
        player,
        end,
        &mut DefaultExit,
        None,
        &mut RecordingPlayer::default(),
    )
    .unwrap();

    assert_eq!(outcome.entity(), player);
    assert_eq!(s.universe.locate_entity(player), Some(s.end));
}
