//! Moving entities and players between worlds.
//!
//! A transfer is a fixed sequence of steps, each of which may end it early:
//!
//! 1. Check that the subject exists, is alive, and lives in an authoritative world.
//! 2. Find the exit. Unless the caller supplies an already-posted [`PortalTeleportEvent`],
//!    a [`PortalAgent`] is invoked inside an
//!    [`InvokingTeleporter`](crate::phase::EntityPhase::InvokingTeleporter) phase, so that any
//!    blocks it places (such as a portal frame) are captured rather than written.
//! 3. Post the [`PortalTeleportEvent`]. Cancelling it, or redirecting it to another world,
//!    rolls back the agent's blocks and the subject's transform.
//! 4. Commit the agent's blocks (unless the event declined them), load the destination
//!    chunk, and move the subject inside a
//!    [`ChangingDimension`](crate::phase::EntityPhase::ChangingDimension) phase.
//!
//! At every point where the transfer ends, the subject is attached to exactly one world.

use arcstr::ArcStr;
use serde_json::Value;

use crate::archetype::{EntityRegistry, TransferStrategy};
use crate::capture::{BlockChange, Captures};
use crate::cause::{CauseObject, ContextKey, ContextValue, TeleportType};
use crate::config::TransferConfig;
use crate::entity::{Entity, EntityId};
use crate::event::{Cancellable as _, EventBus, EventMut, PortalTeleportEvent};
use crate::math::{Cube, FreeCoordinate, FreePoint, FreeVector};
use crate::phase::{EntityPhase, PhaseContext, PhaseExtra, PhaseState, TeleportExtra};
use crate::tracker::TrackingSession;
use crate::tracking::commit_block_changes;
use crate::transform::Transform;
use crate::util::ErrorChain;
use crate::world::{Difficulty, DimensionKind, WorldAccess, WorldId};

#[cfg(test)]
mod tests;

// -------------------------------------------------------------------------------------------------

/// Finds or builds the exit point of a portal in a destination world.
pub trait PortalAgent {
    /// Name used in causes and events.
    fn name(&self) -> ArcStr;

    /// Decides where `subject` should arrive in `destination`.
    ///
    /// Block changes made through `session` while this runs are captured, and are only
    /// written if the teleport goes ahead. Returning [`None`] declines, and the subject
    /// arrives at `default_exit` instead.
    fn place_entity(
        &mut self,
        session: &TrackingSession,
        worlds: &mut dyn WorldAccess,
        subject: &Entity,
        destination: WorldId,
        default_exit: Transform,
    ) -> Option<Transform>;

    /// Called when a portal this agent placed was rolled back, so that any cache of
    /// known portal locations can drop it.
    fn forget_portal(&mut self, world: WorldId, cube: Cube) {
        let _ = (world, cube);
    }
}

/// A [`PortalAgent`] which never places anything, so that subjects always arrive at the
/// default exit.
#[derive(Clone, Copy, Debug, Default)]
#[allow(clippy::exhaustive_structs)]
pub struct DefaultExit;

impl PortalAgent for DefaultExit {
    fn name(&self) -> ArcStr {
        arcstr::literal!("default")
    }

    fn place_entity(
        &mut self,
        _: &TrackingSession,
        _: &mut dyn WorldAccess,
        _: &Entity,
        _: WorldId,
        _: Transform,
    ) -> Option<Transform> {
        None
    }
}

/// Notified after a transfer has completed.
///
/// Hooks run after every phase the transfer entered has ended, and cannot affect its
/// outcome.
pub trait TransferHooks {
    /// `entity` is the subject's id in the destination world, which differs from its
    /// original id if it was recreated.
    fn entity_transferred(&mut self, entity: EntityId, from: WorldId, to: WorldId) {
        let _ = (entity, from, to);
    }
}

impl TransferHooks for () {}

/// The client connection of a player, as needed to keep the client's view consistent
/// while the player changes worlds.
pub trait PlayerSession {
    /// Sends one packet to the player's client.
    fn send(&mut self, player: EntityId, packet: ClientSyncPacket);

    /// Updates player-list bookkeeping after the player has moved to `world`.
    fn update_player_list(&mut self, player: EntityId, world: WorldId) {
        let _ = (player, world);
    }

    /// Awards progress for having travelled between these kinds of dimension.
    fn trigger_dimension_advancement(
        &mut self,
        player: EntityId,
        from: DimensionKind,
        to: DimensionKind,
    ) {
        let _ = (player, from, to);
    }
}

/// State replayed to a player's client after they change worlds, in the order sent.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum ClientSyncPacket {
    /// The client should discard its world and enter another.
    Respawn {
        #[allow(missing_docs)]
        world: WorldId,
        #[allow(missing_docs)]
        dimension: DimensionKind,
    },
    #[allow(missing_docs)]
    Position(Transform),
    #[allow(missing_docs)]
    Difficulty(Difficulty),
    /// The player's persisted `"abilities"`.
    Abilities(Value),
    /// The player's persisted `"Inventory"`.
    Inventory(Value),
    /// One entry of the player's persisted `"ActiveEffects"`.
    PotionEffect(Value),
    /// The player's persisted `"Attributes"`.
    Attributes(Value),
    #[allow(missing_docs)]
    Experience {
        level: i64,
        progress: f64,
        total: i64,
    },
}

/// Everything a transfer needs besides its subject and portal agent.
#[allow(missing_debug_implementations, clippy::exhaustive_structs)]
pub struct Collaborators<'a> {
    #[allow(missing_docs)]
    pub session: &'a TrackingSession,
    #[allow(missing_docs)]
    pub worlds: &'a mut dyn WorldAccess,
    #[allow(missing_docs)]
    pub bus: &'a mut dyn EventBus,
    /// Decides whether entities are relocated or recreated.
    pub registry: &'a EntityRegistry,
    #[allow(missing_docs)]
    pub hooks: &'a mut dyn TransferHooks,
}

// -------------------------------------------------------------------------------------------------

/// Result of a transfer which got past its preconditions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransferOutcome {
    /// The subject is now in the destination world.
    Transferred {
        /// The subject's id in the destination world.
        entity: EntityId,
        #[allow(missing_docs)]
        from: WorldId,
        #[allow(missing_docs)]
        to: WorldId,
    },
    /// The subject is still where it started, with its original transform.
    NotTransferred {
        #[allow(missing_docs)]
        entity: EntityId,
        /// The world the subject is still in.
        world: WorldId,
        #[allow(missing_docs)]
        reason: NotTransferredReason,
    },
}

/// Why a transfer did not happen.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, displaydoc::Display)]
#[non_exhaustive]
pub enum NotTransferredReason {
    /// the teleport event was cancelled
    Cancelled,
    /// the teleport event was redirected to a different world
    Redirected,
    /// the portal agent's block changes were rejected
    BlockCommitRejected,
    /// the destination world refused the subject
    DestinationRejected,
    /// the exit is not a valid location
    InvalidDestination,
    /// the subject could not be recreated in the destination world
    MaterializeFailed,
}

impl TransferOutcome {
    /// Returns the subject's current id, which differs from its original id if it was
    /// recreated.
    pub fn entity(&self) -> EntityId {
        match *self {
            TransferOutcome::Transferred { entity, .. }
            | TransferOutcome::NotTransferred { entity, .. } => entity,
        }
    }

    /// Returns the world the subject is now in.
    pub fn world(&self) -> WorldId {
        match *self {
            TransferOutcome::Transferred { to: world, .. }
            | TransferOutcome::NotTransferred { world, .. } => world,
        }
    }

    #[allow(missing_docs)]
    pub fn is_transferred(&self) -> bool {
        matches!(self, TransferOutcome::Transferred { .. })
    }
}

// -------------------------------------------------------------------------------------------------

/// Moves a non-player entity to `destination`.
///
/// If `event` is given, it is taken to have been posted already, and its destination is
/// used without consulting `agent`.
///
/// Returns [`None`] without doing anything if the entity does not exist, is removed, is a
/// player, or is in a non-authoritative world, or if `destination` does not exist.
pub fn transfer_entity(
    cx: &mut Collaborators<'_>,
    entity: EntityId,
    destination: WorldId,
    agent: &mut dyn PortalAgent,
    event: Option<PortalTeleportEvent>,
) -> Option<TransferOutcome> {
    let subject = check_preconditions(cx, entity, destination)?;
    if subject.is_player() {
        log::debug!("{entity} is a player and must be moved with transfer_player()");
        return None;
    }
    Transfer::new(subject, destination).run(cx, agent, event, None)
}

/// Moves a player to `destination`, replaying client state through `player_session`.
///
/// Behaves like [`transfer_entity()`], except that players are always relocated rather
/// than recreated, and it returns [`None`] if `player` is not a player.
pub fn transfer_player(
    cx: &mut Collaborators<'_>,
    player: EntityId,
    destination: WorldId,
    agent: &mut dyn PortalAgent,
    event: Option<PortalTeleportEvent>,
    player_session: &mut dyn PlayerSession,
) -> Option<TransferOutcome> {
    let subject = check_preconditions(cx, player, destination)?;
    if !subject.is_player() {
        log::debug!("{player} is not a player");
        return None;
    }
    Transfer::new(subject, destination).run(cx, agent, event, Some(player_session))
}

/// Returns where an entity at `from` arrives in `destination` if no portal agent places it.
///
/// * Entering an end dimension arrives at the configured exit platform.
/// * Leaving an end dimension arrives at the destination's spawn point.
/// * Otherwise, horizontal coordinates are scaled by the ratio of the dimensions'
///   [coordinate scales](DimensionKind::coordinate_scale), and clamped to the world border.
pub fn default_exit(
    config: &TransferConfig,
    worlds: &dyn WorldAccess,
    from: Transform,
    destination: WorldId,
) -> Option<Transform> {
    let source = worlds.world_info(from.world())?;
    let target = worlds.world_info(destination)?;
    let position = if target.dimension == DimensionKind::End {
        config.end_exit_cube().standing_point()
    } else if source.dimension == DimensionKind::End {
        target.spawn_point.standing_point()
    } else {
        let ratio = source.dimension.coordinate_scale() / target.dimension.coordinate_scale();
        let border = config.world_border;
        let FreePoint { x, y, z, .. } = from.position();
        FreePoint::new(clamp_to_border(x * ratio, border), y, clamp_to_border(z * ratio, border))
    };
    Some(from.with_world(destination).with_position(position))
}

/// Unlike [`f64::clamp()`], does not panic if `border` is negative or NaN.
fn clamp_to_border(coordinate: FreeCoordinate, border: FreeCoordinate) -> FreeCoordinate {
    coordinate.max(-border).min(border)
}

fn check_preconditions(
    cx: &Collaborators<'_>,
    id: EntityId,
    destination: WorldId,
) -> Option<Entity> {
    let Some(world) = cx.worlds.locate_entity(id) else {
        log::debug!("cannot transfer {id}: not in any world");
        return None;
    };
    let entity = cx.worlds.entity(world, id)?;
    if entity.is_removed() {
        log::debug!("cannot transfer {id}: removed");
        return None;
    }
    if !cx.worlds.world_info(world)?.authoritative {
        log::debug!("cannot transfer {id}: {world} is not authoritative");
        return None;
    }
    if cx.worlds.world_info(destination).is_none() {
        log::debug!("cannot transfer {id}: {destination} does not exist");
        return None;
    }
    Some(entity.clone())
}

// -------------------------------------------------------------------------------------------------

/// State of one transfer attempt.
struct Transfer {
    /// Copy of the subject as it was when the transfer began.
    subject: Entity,
    destination: WorldId,
    /// Blocks placed by the portal agent and not yet committed or restored.
    captures: Captures<BlockChange>,
    /// Exit the portal agent chose, if it chose one.
    placed: Option<Transform>,
}

impl Transfer {
    fn new(subject: Entity, destination: WorldId) -> Self {
        Self {
            subject,
            destination,
            captures: Captures::new(),
            placed: None,
        }
    }

    fn id(&self) -> EntityId {
        self.subject.id()
    }

    fn origin(&self) -> WorldId {
        self.subject.world()
    }

    fn cause_object(&self) -> CauseObject {
        if self.subject.is_player() {
            CauseObject::Player(self.id())
        } else {
            CauseObject::Entity(self.id())
        }
    }

    fn not_transferred(&self, reason: NotTransferredReason) -> Option<TransferOutcome> {
        log::debug!("{} not transferred: {reason}", self.id());
        Some(TransferOutcome::NotTransferred {
            entity: self.id(),
            world: self.origin(),
            reason,
        })
    }

    fn run(
        mut self,
        cx: &mut Collaborators<'_>,
        agent: &mut dyn PortalAgent,
        event: Option<PortalTeleportEvent>,
        player_session: Option<&mut dyn PlayerSession>,
    ) -> Option<TransferOutcome> {
        let session = cx.session;
        let agent_name = agent.name();

        // Attribution for the teleport event and for committing the agent's blocks.
        let frame = session.causes().push_frame();
        frame
            .push_cause(self.cause_object())
            .push_cause(CauseObject::PortalAgent(agent_name.clone()))
            .add_context(
                ContextKey::TeleportType,
                ContextValue::TeleportType(TeleportType::Portal),
            )
            .add_context(
                ContextKey::PortalAgent,
                ContextValue::Object(CauseObject::PortalAgent(agent_name.clone())),
            );

        let event = match event {
            Some(event) => event,
            None => {
                let exit = self.invoke_agent(cx, agent)?;
                let mut event = PortalTeleportEvent::new(
                    session.causes().current_cause(),
                    self.id(),
                    self.subject.transform(),
                    exit,
                    Some(agent_name),
                );
                let cancelled =
                    cx.bus.post(EventMut::PortalTeleport(&mut event)) || event.is_cancelled();
                if cancelled {
                    event.set_cancelled(true);
                }
                if event.to().world() != exit.world() && !event.is_cancelled() {
                    log::debug!(
                        "teleport of {} redirected from {} to {}",
                        self.id(),
                        exit.world(),
                        event.to().world()
                    );
                    event.set_cancelled(true);
                    self.roll_back(cx, agent);
                    return self.not_transferred(NotTransferredReason::Redirected);
                }
                event
            }
        };

        if event.is_cancelled() {
            self.roll_back(cx, agent);
            return self.not_transferred(NotTransferredReason::Cancelled);
        }
        let exit = event.to();
        if !exit.is_finite() || exit.world() != self.destination {
            self.roll_back(cx, agent);
            return self.not_transferred(NotTransferredReason::InvalidDestination);
        }

        if !event.use_portal_agent() && !self.captures.is_empty() {
            log::debug!(
                "discarding {} blocks placed by {}",
                self.captures.len(),
                agent.name()
            );
            self.captures.restore_originals(cx.worlds);
            self.forget_placed_portal(agent);
        }
        if !self.captures.is_empty()
            && !commit_block_changes(session, &mut self.captures, false, cx.worlds, cx.bus)
        {
            self.roll_back(cx, agent);
            return self.not_transferred(NotTransferredReason::BlockCommitRejected);
        }
        drop(frame);

        if let Some(chunk) = exit.chunk() {
            if !cx.worlds.is_chunk_loaded(self.destination, chunk) {
                log::debug!("loading {chunk:?} in {} for arrival", self.destination);
                if !cx.worlds.load_or_generate_chunk(self.destination, chunk) {
                    self.roll_back(cx, agent);
                    return self.not_transferred(NotTransferredReason::DestinationRejected);
                }
            }
        }

        let guard = session.enter(
            PhaseContext::new(PhaseState::Entity(EntityPhase::ChangingDimension))
                .with_target_world(self.destination)
                .with_source(self.cause_object())
                .with_extra(PhaseExtra::DimensionChange {
                    subject: self.id(),
                    from: self.origin(),
                    to: self.destination,
                }),
        );
        let mut player_session = player_session;
        let swapped = self.swap(cx, exit, event.keep_velocity(), player_session.is_some());
        if let (Ok(arrived), Some(player_session)) = (swapped, player_session.as_deref_mut()) {
            sync_player(cx.worlds, player_session, arrived, self.destination);
        }
        guard.close(cx.worlds, cx.bus);

        match swapped {
            Ok(arrived) => {
                log::debug!(
                    "{} transferred from {} to {} as {arrived}",
                    self.id(),
                    self.origin(),
                    self.destination
                );
                cx.hooks
                    .entity_transferred(arrived, self.origin(), self.destination);
                if let Some(player_session) = player_session {
                    player_session.update_player_list(arrived, self.destination);
                    if let (Some(from), Some(to)) = (
                        cx.worlds.world_info(self.origin()),
                        cx.worlds.world_info(self.destination),
                    ) {
                        player_session.trigger_dimension_advancement(
                            arrived,
                            from.dimension,
                            to.dimension,
                        );
                    }
                }
                Some(TransferOutcome::Transferred {
                    entity: arrived,
                    from: self.origin(),
                    to: self.destination,
                })
            }
            Err(reason) => self.not_transferred(reason),
        }
    }

    /// Runs the portal agent and returns the exit it chose, or the default exit.
    fn invoke_agent(
        &mut self,
        cx: &mut Collaborators<'_>,
        agent: &mut dyn PortalAgent,
    ) -> Option<Transform> {
        let session = cx.session;
        let from = self.subject.transform();
        let default = default_exit(
            &session.config().transfer,
            &*cx.worlds,
            from,
            self.destination,
        )?;

        let guard = session.enter(
            PhaseContext::new(PhaseState::Entity(EntityPhase::InvokingTeleporter))
                .with_target_world(self.destination)
                .with_source(self.cause_object())
                .with_extra(PhaseExtra::Teleport(TeleportExtra {
                    portal_agent: agent.name(),
                    subject: self.id(),
                    from,
                    exit: None,
                    did_port: false,
                })),
        );
        self.placed =
            agent.place_entity(session, cx.worlds, &self.subject, self.destination, default);
        let exit = self.placed.unwrap_or(default);
        let did_port = self.placed.is_some();
        guard.context_mut(|ctx| {
            if let Some(teleport) = ctx.teleport_mut() {
                teleport.exit = Some(exit);
                teleport.did_port = did_port;
            }
        });
        self.captures = guard.take_block_captures();
        guard.close(cx.worlds, cx.bus);

        log::debug!(
            "{} chose {:?} for {} ({} blocks placed)",
            agent.name(),
            exit.position(),
            self.id(),
            self.captures.len()
        );
        Some(exit)
    }

    /// Undoes everything the transfer did before the subject was moved.
    fn roll_back(&mut self, cx: &mut Collaborators<'_>, agent: &mut dyn PortalAgent) {
        let restored = self.captures.restore_originals(cx.worlds);
        if let Some(entity) = cx.worlds.entity_mut(self.origin(), self.id()) {
            entity.set_transform(self.subject.transform());
        }
        self.forget_placed_portal(agent);
        log::debug!("rolled back transfer of {}; {restored} blocks restored", self.id());
    }

    fn forget_placed_portal(&mut self, agent: &mut dyn PortalAgent) {
        if let Some(exit) = self.placed.take() {
            if let Some(cube) = exit.cube() {
                agent.forget_portal(exit.world(), cube);
            }
        }
    }

    /// Detaches the subject from its world and attaches it, or its replacement, to the
    /// destination. On failure, the original is attached to its original world again.
    fn swap(
        &self,
        cx: &mut Collaborators<'_>,
        exit: Transform,
        keep_velocity: bool,
        is_player: bool,
    ) -> Result<EntityId, NotTransferredReason> {
        let Some(mut original) = cx.worlds.remove_entity(self.origin(), self.id()) else {
            log::debug!("{} vanished before it could be moved", self.id());
            return Err(NotTransferredReason::DestinationRejected);
        };
        let strategy = if is_player {
            TransferStrategy::Relocate
        } else {
            cx.registry.transfer_strategy(original.kind())
        };

        let mut arriving = match strategy {
            TransferStrategy::Relocate => {
                let mut moved = original.clone();
                moved.set_transform(exit);
                moved
            }
            TransferStrategy::Recreate => {
                let new_id = cx.worlds.allocate_entity_id();
                match cx.registry.materialize(
                    new_id,
                    original.kind(),
                    exit,
                    &original.write_data(),
                ) {
                    Ok(mut recreated) => {
                        // The persisted rotation is the old one; the exit's wins.
                        recreated.set_transform(exit);
                        recreated
                    }
                    Err(error) => {
                        log::debug!("could not recreate {}: {}", self.id(), ErrorChain(&error));
                        reattach(cx.worlds, original);
                        return Err(NotTransferredReason::MaterializeFailed);
                    }
                }
            }
        };
        if !keep_velocity {
            arriving.set_velocity(FreeVector::zero());
        }

        let arrived = arriving.id();
        match cx.worlds.spawn_entity(self.destination, arriving) {
            Ok(()) => {
                if strategy == TransferStrategy::Recreate {
                    original.mark_removed();
                }
                Ok(arrived)
            }
            Err(_) => {
                reattach(cx.worlds, original);
                Err(NotTransferredReason::DestinationRejected)
            }
        }
    }
}

fn reattach(worlds: &mut dyn WorldAccess, entity: Entity) {
    let world = entity.world();
    if let Err(entity) = worlds.spawn_entity(world, entity) {
        log::error!("{} could not be returned to {world} and is lost", entity.id());
    }
}

/// Sends the destination world and the player's state to their client.
fn sync_player(
    worlds: &dyn WorldAccess,
    player_session: &mut dyn PlayerSession,
    player: EntityId,
    world: WorldId,
) {
    let (Some(info), Some(entity)) = (worlds.world_info(world), worlds.entity(world, player))
    else {
        return;
    };
    let data = entity.data();
    let value = |key: &str| data.get(key).cloned().unwrap_or(Value::Null);
    let number = |key: &str| data.get(key).and_then(Value::as_i64).unwrap_or(0);

    player_session.send(
        player,
        ClientSyncPacket::Respawn {
            world,
            dimension: info.dimension,
        },
    );
    player_session.send(player, ClientSyncPacket::Position(entity.transform()));
    player_session.send(player, ClientSyncPacket::Difficulty(info.difficulty));
    player_session.send(player, ClientSyncPacket::Abilities(value("abilities")));
    player_session.send(player, ClientSyncPacket::Inventory(value("Inventory")));
    if let Some(Value::Array(effects)) = data.get("ActiveEffects") {
        for effect in effects {
            player_session.send(player, ClientSyncPacket::PotionEffect(effect.clone()));
        }
    }
    player_session.send(player, ClientSyncPacket::Attributes(value("Attributes")));
    player_session.send(
        player,
        ClientSyncPacket::Experience {
            level: number("XpLevel"),
            progress: data.get("XpP").and_then(Value::as_f64).unwrap_or(0.0),
            total: number("XpTotal"),
        },
    );
}
