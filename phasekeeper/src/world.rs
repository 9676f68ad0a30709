//! The world-storage collaborator: how the tracking core reads and writes blocks,
//! chunks, and entities.
//!
//! The core never owns world storage. It is handed a `&mut dyn` [`WorldAccess`] by the
//! embedding engine for each operation. [`Universe`] is a complete in-memory
//! implementation, suitable for tests and for embedders without storage of their own.

use core::fmt;

use arcstr::ArcStr;

use crate::entity::{Entity, EntityId};
use crate::math::{ChunkPos, Cube};

mod universe;
pub use universe::*;

// -------------------------------------------------------------------------------------------------

/// Identifies one world (one loaded dimension) among those an engine hosts.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize)]
pub struct WorldId(pub u32);

impl fmt::Debug for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "world#{}", self.0)
    }
}
impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The state of one cube of a world, such as `"minecraft:stone"`.
///
/// Block states are opaque to the tracking core; it only compares, stores, and writes
/// them back.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct BlockState(ArcStr);

impl BlockState {
    /// The empty block state. Cubes which were never written hold this state.
    pub const AIR: Self = Self(arcstr::literal!("minecraft:air"));

    /// Constructs a block state with the given identifier.
    pub fn new(id: impl Into<ArcStr>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier of this state.
    pub fn id(&self) -> &str {
        &self.0
    }

    /// Whether this is [`BlockState::AIR`].
    pub fn is_air(&self) -> bool {
        *self == Self::AIR
    }
}

impl fmt::Debug for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BlockState {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Which kind of dimension a world is. Determines default portal exits.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum DimensionKind {
    /// The surface dimension.
    Overworld,
    /// The dimension whose horizontal coordinates are compressed relative to the overworld.
    Nether,
    /// The dimension entered by end portals, with a fixed exit platform.
    End,
    /// Any other dimension. Treated like the overworld for coordinate scaling.
    Custom,
}

impl DimensionKind {
    /// Number of overworld cubes that one cube of this dimension corresponds to,
    /// horizontally.
    pub const fn coordinate_scale(self) -> f64 {
        match self {
            DimensionKind::Nether => 8.0,
            DimensionKind::Overworld | DimensionKind::End | DimensionKind::Custom => 1.0,
        }
    }
}

/// Game difficulty, which players are told about when they change worlds.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[allow(missing_docs)]
pub enum Difficulty {
    Peaceful,
    Easy,
    #[default]
    Normal,
    Hard,
}

/// Static properties of a world.
#[derive(Clone, Debug, PartialEq)]
pub struct WorldInfo {
    /// Name of the world, for diagnostics.
    pub name: ArcStr,
    /// Kind of dimension.
    pub dimension: DimensionKind,
    /// Where players respawn, and where entities leaving the end arrive.
    pub spawn_point: Cube,
    /// Difficulty setting.
    pub difficulty: Difficulty,
    /// Whether this process is authoritative for the world's contents.
    ///
    /// Non-authoritative (client-side mirror) worlds never perform tracked operations.
    pub authoritative: bool,
}

impl WorldInfo {
    /// Constructs a [`WorldInfo`] for an authoritative world with a spawn point at the
    /// origin and default difficulty.
    pub fn new(name: impl Into<ArcStr>, dimension: DimensionKind) -> Self {
        Self {
            name: name.into(),
            dimension,
            spawn_point: Cube::new(0, 64, 0),
            difficulty: Difficulty::default(),
            authoritative: true,
        }
    }
}

/// Access to world storage, as needed by the tracking core.
///
/// Implementations perform mutations directly and without any tracking; the core decides
/// when to call them. Engine code should not call the mutating methods itself while a
/// capturing phase is active, but go through [`TrackingSession`](crate::TrackingSession).
pub trait WorldAccess {
    /// Returns the properties of the given world, or [`None`] if there is no such world.
    fn world_info(&self, world: WorldId) -> Option<&WorldInfo>;

    /// Returns the current block state at `cube`, or [`None`] if there is no such world.
    fn block_state(&self, world: WorldId, cube: Cube) -> Option<BlockState>;

    /// Writes a block state. Returns whether the write happened.
    ///
    /// Writing into a chunk which is not loaded loads it.
    fn set_block_state(&mut self, world: WorldId, cube: Cube, state: BlockState) -> bool;

    /// Whether the chunk is loaded.
    fn is_chunk_loaded(&self, world: WorldId, chunk: ChunkPos) -> bool;

    /// Loads the chunk, generating it if it never existed. Synchronous.
    /// Returns false if there is no such world.
    fn load_or_generate_chunk(&mut self, world: WorldId, chunk: ChunkPos) -> bool;

    /// Attaches an entity to the given world's live-entity set.
    ///
    /// On failure, the entity is returned. Failure occurs if the world does not exist,
    /// the entity's chunk is not loaded, the entity is marked removed, or an entity with
    /// the same id is already attached to any world.
    fn spawn_entity(&mut self, world: WorldId, entity: Entity) -> Result<(), Entity>;

    /// Detaches an entity from the world's live-entity set and returns it.
    fn remove_entity(&mut self, world: WorldId, id: EntityId) -> Option<Entity>;

    /// Returns the live entity with the given id, if it is attached to `world`.
    fn entity(&self, world: WorldId, id: EntityId) -> Option<&Entity>;

    /// Returns the live entity with the given id, if it is attached to `world`.
    fn entity_mut(&mut self, world: WorldId, id: EntityId) -> Option<&mut Entity>;

    /// Returns which world the entity is attached to, if any.
    fn locate_entity(&self, id: EntityId) -> Option<WorldId>;

    /// Returns a fresh entity id which has never been used.
    fn allocate_entity_id(&mut self) -> EntityId;
}
