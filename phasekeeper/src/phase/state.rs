use core::fmt;

/// What the engine is currently doing, as far as mutation tracking is concerned.
///
/// States carry no data; everything gathered during a phase lives in its
/// [`PhaseContext`](super::PhaseContext). The methods of this type define the policies
/// for each state.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum PhaseState {
    /// No phase is active. Mutations are applied immediately.
    #[default]
    Idle,
    #[allow(missing_docs)]
    Tick(TickPhase),
    #[allow(missing_docs)]
    Block(BlockPhase),
    #[allow(missing_docs)]
    Entity(EntityPhase),
    #[allow(missing_docs)]
    Packet(PacketPhase),
    #[allow(missing_docs)]
    Generation(GenerationPhase),
    #[allow(missing_docs)]
    Plugin(PluginPhase),
}

/// Phases of the per-tick world update.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TickPhase {
    /// The world's own bookkeeping, outside any particular object's update.
    World,
    /// Updating one entity.
    Entity,
    /// A scheduled block update.
    Block,
    /// A random block update, such as crop growth.
    RandomBlock,
    /// Updating a block entity, such as a furnace.
    BlockEntity,
    /// Weather effects, such as lightning and snow.
    Weather,
}

/// Phases of block behavior outside the tick loop.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BlockPhase {
    /// Leaves and similar blocks decaying.
    Decay,
    /// Blocks being written back after a cancelled change. Never captured.
    Restoration,
    /// A broken block producing its drops.
    BlockDrops,
}

/// Phases of entity behavior outside the entity's own tick.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EntityPhase {
    /// An entity dying and dropping its loot.
    Death,
    /// An entity being moved from one world to another.
    ChangingDimension,
    /// A portal agent finding or building the exit for a teleport.
    InvokingTeleporter,
}

/// Phases of processing a packet from a player's client.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PacketPhase {
    /// Using an item or interacting with a block or entity.
    Interaction,
    /// Placing a block.
    Placement,
    /// Moving items in an inventory.
    Inventory,
    /// Player movement.
    Movement,
}

/// Phases of world generation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum GenerationPhase {
    /// Generating the base terrain of a chunk.
    Terrain,
    /// Decorating a chunk with features and structures.
    Population,
}

/// Phases of mutations initiated by plugins.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PluginPhase {
    /// A plugin changing many blocks as one operation.
    BlockWorker,
    /// A plugin spawning entities.
    EntitySpawning,
    /// A plugin's scheduled task.
    Scheduled,
}

/// What happens to a block change requested during a phase.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BlockPolicy {
    /// Buffer it, to be published as part of a batch when the phase ends.
    Capture,
    /// Apply it now, without publishing an event.
    Immediate,
    /// Refuse it. The phase is defined never to change blocks.
    Reject,
}

/// What happens to an entity spawn requested during a phase.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SpawnPolicy {
    /// Buffer it, to be published when the phase ends.
    Capture,
    /// Buffer it along with the phase's owner, so that spawns are published per owner.
    CaptureWithOwner,
    /// Attach the entity now, without publishing an event.
    Force,
}

/// What happens to a phase's remaining captures when the phase ends.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum UnwindAction {
    /// Publish and commit them.
    Flush,
    /// Restore originals and drop them.
    Discard,
    /// The phase never captures anything; remaining captures are a bug.
    AssertEmpty,
}

/// Kinds of captured mutations, for ordering the flush of a phase.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[allow(missing_docs)]
pub enum CaptureKind {
    Blocks,
    ItemDrops,
    EntitySpawns,
}

impl PhaseState {
    /// Whether block changes requested during this phase are captured, applied, or
    /// rejected.
    pub const fn block_policy(self) -> BlockPolicy {
        use BlockPolicy::*;
        match self {
            PhaseState::Idle => Immediate,
            PhaseState::Tick(TickPhase::World) => Immediate,
            PhaseState::Tick(_) => Capture,
            PhaseState::Block(BlockPhase::Decay) => Capture,
            PhaseState::Block(BlockPhase::Restoration) => Immediate,
            PhaseState::Block(BlockPhase::BlockDrops) => Reject,
            PhaseState::Entity(EntityPhase::Death) => Capture,
            PhaseState::Entity(EntityPhase::ChangingDimension) => Reject,
            PhaseState::Entity(EntityPhase::InvokingTeleporter) => Capture,
            PhaseState::Packet(PacketPhase::Interaction | PacketPhase::Placement) => Capture,
            PhaseState::Packet(PacketPhase::Inventory) => Reject,
            PhaseState::Packet(PacketPhase::Movement) => Immediate,
            PhaseState::Generation(_) => Immediate,
            PhaseState::Plugin(PluginPhase::BlockWorker | PluginPhase::Scheduled) => Capture,
            PhaseState::Plugin(PluginPhase::EntitySpawning) => Immediate,
        }
    }

    /// Whether entity spawns requested during this phase are captured or forced through.
    pub const fn spawn_policy(self) -> SpawnPolicy {
        use SpawnPolicy::*;
        match self {
            PhaseState::Idle
            | PhaseState::Tick(TickPhase::World)
            | PhaseState::Block(BlockPhase::Restoration)
            | PhaseState::Entity(EntityPhase::ChangingDimension)
            | PhaseState::Packet(PacketPhase::Movement)
            | PhaseState::Generation(_) => Force,

            PhaseState::Tick(TickPhase::Entity | TickPhase::BlockEntity)
            | PhaseState::Entity(EntityPhase::Death)
            | PhaseState::Packet(PacketPhase::Interaction | PacketPhase::Placement) => {
                CaptureWithOwner
            }

            PhaseState::Tick(TickPhase::Block | TickPhase::RandomBlock | TickPhase::Weather)
            | PhaseState::Block(BlockPhase::Decay | BlockPhase::BlockDrops)
            | PhaseState::Entity(EntityPhase::InvokingTeleporter)
            | PhaseState::Packet(PacketPhase::Inventory)
            | PhaseState::Plugin(_) => Capture,
        }
    }

    /// Whether item drops requested during this phase are captured. If not, they are
    /// spawned immediately.
    pub const fn captures_item_drops(self) -> bool {
        matches!(
            self,
            PhaseState::Tick(
                TickPhase::Entity
                    | TickPhase::Block
                    | TickPhase::RandomBlock
                    | TickPhase::BlockEntity
            ) | PhaseState::Block(BlockPhase::Decay | BlockPhase::BlockDrops)
                | PhaseState::Entity(EntityPhase::Death)
                | PhaseState::Packet(
                    PacketPhase::Interaction | PacketPhase::Placement | PacketPhase::Inventory
                )
                | PhaseState::Plugin(PluginPhase::Scheduled)
        )
    }

    /// What happens to remaining captures when a phase in this state ends.
    pub const fn unwind_action(self) -> UnwindAction {
        match self {
            PhaseState::Entity(EntityPhase::InvokingTeleporter) => UnwindAction::Discard,
            _ if self.never_captures() => UnwindAction::AssertEmpty,
            _ => UnwindAction::Flush,
        }
    }

    const fn never_captures(self) -> bool {
        !matches!(self.block_policy(), BlockPolicy::Capture)
            && matches!(self.spawn_policy(), SpawnPolicy::Force)
            && !self.captures_item_drops()
    }

    /// The order in which kinds of captures are flushed when a phase in this state ends.
    pub const fn flush_order(self) -> [CaptureKind; 3] {
        use CaptureKind::*;
        match self {
            // Loot is dropped before anything the death caused to happen to blocks.
            PhaseState::Entity(EntityPhase::Death) => [ItemDrops, Blocks, EntitySpawns],
            PhaseState::Packet(PacketPhase::Inventory) => [ItemDrops, EntitySpawns, Blocks],
            _ => [Blocks, ItemDrops, EntitySpawns],
        }
    }

    /// Whether vetoing any one block change in this phase's batch discards the whole
    /// batch.
    pub const fn fully_cancellable(self) -> bool {
        matches!(
            self,
            PhaseState::Block(BlockPhase::Decay)
                | PhaseState::Entity(EntityPhase::InvokingTeleporter)
        )
    }

    /// A short human-readable name, such as `"tick/entity"`.
    pub const fn name(self) -> &'static str {
        match self {
            PhaseState::Idle => "idle",
            PhaseState::Tick(t) => match t {
                TickPhase::World => "tick/world",
                TickPhase::Entity => "tick/entity",
                TickPhase::Block => "tick/block",
                TickPhase::RandomBlock => "tick/random-block",
                TickPhase::BlockEntity => "tick/block-entity",
                TickPhase::Weather => "tick/weather",
            },
            PhaseState::Block(b) => match b {
                BlockPhase::Decay => "block/decay",
                BlockPhase::Restoration => "block/restoration",
                BlockPhase::BlockDrops => "block/drops",
            },
            PhaseState::Entity(e) => match e {
                EntityPhase::Death => "entity/death",
                EntityPhase::ChangingDimension => "entity/changing-dimension",
                EntityPhase::InvokingTeleporter => "entity/invoking-teleporter",
            },
            PhaseState::Packet(p) => match p {
                PacketPhase::Interaction => "packet/interaction",
                PacketPhase::Placement => "packet/placement",
                PacketPhase::Inventory => "packet/inventory",
                PacketPhase::Movement => "packet/movement",
            },
            PhaseState::Generation(g) => match g {
                GenerationPhase::Terrain => "generation/terrain",
                GenerationPhase::Population => "generation/population",
            },
            PhaseState::Plugin(p) => match p {
                PluginPhase::BlockWorker => "plugin/block-worker",
                PluginPhase::EntitySpawning => "plugin/entity-spawning",
                PluginPhase::Scheduled => "plugin/scheduled",
            },
        }
    }

    /// All states, for exhaustive tests and diagnostics.
    pub const ALL: [PhaseState; 22] = [
        PhaseState::Idle,
        PhaseState::Tick(TickPhase::World),
        PhaseState::Tick(TickPhase::Entity),
        PhaseState::Tick(TickPhase::Block),
        PhaseState::Tick(TickPhase::RandomBlock),
        PhaseState::Tick(TickPhase::BlockEntity),
        PhaseState::Tick(TickPhase::Weather),
        PhaseState::Block(BlockPhase::Decay),
        PhaseState::Block(BlockPhase::Restoration),
        PhaseState::Block(BlockPhase::BlockDrops),
        PhaseState::Entity(EntityPhase::Death),
        PhaseState::Entity(EntityPhase::ChangingDimension),
        PhaseState::Entity(EntityPhase::InvokingTeleporter),
        PhaseState::Packet(PacketPhase::Interaction),
        PhaseState::Packet(PacketPhase::Placement),
        PhaseState::Packet(PacketPhase::Inventory),
        PhaseState::Packet(PacketPhase::Movement),
        PhaseState::Generation(GenerationPhase::Terrain),
        PhaseState::Generation(GenerationPhase::Population),
        PhaseState::Plugin(PluginPhase::BlockWorker),
        PhaseState::Plugin(PluginPhase::EntitySpawning),
        PhaseState::Plugin(PluginPhase::Scheduled),
    ];
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
