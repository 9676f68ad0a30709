use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};

use crate::entity::{Entity, EntityId, EntityKind};
use crate::math::{ChunkPos, Cube, FreePoint};
use crate::transform::Transform;
use crate::world::{BlockState, DimensionKind, WorldAccess, WorldId, WorldInfo};

/// In-memory storage for a set of worlds and the entities living in them.
///
/// Blocks which were never written read as [`BlockState::AIR`]. Chunks only have to be
/// loaded for entities to be attached to them; block access works regardless, and block
/// writes load the chunk they touch.
#[derive(Debug, Default)]
pub struct Universe {
    worlds: BTreeMap<WorldId, World>,
    /// Which world each live entity is attached to.
    entity_locations: HashMap<EntityId, WorldId>,
    next_world_id: u32,
    next_entity_id: u64,
}

#[derive(Debug)]
struct World {
    info: WorldInfo,
    blocks: HashMap<Cube, BlockState>,
    loaded_chunks: HashSet<ChunkPos>,
    entities: BTreeMap<EntityId, Entity>,
    /// Number of times a chunk was loaded or generated, for diagnostics.
    chunk_loads: usize,
}

impl Universe {
    /// Constructs an empty [`Universe`] with no worlds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a world and returns its id.
    pub fn create_world(&mut self, info: WorldInfo) -> WorldId {
        let id = WorldId(self.next_world_id);
        self.next_world_id += 1;
        self.worlds.insert(
            id,
            World {
                info,
                blocks: HashMap::new(),
                loaded_chunks: HashSet::new(),
                entities: BTreeMap::new(),
                chunk_loads: 0,
            },
        );
        id
    }

    /// Convenience for [`Universe::create_world()`] with default properties.
    pub fn create_simple_world(&mut self, name: &str, dimension: DimensionKind) -> WorldId {
        self.create_world(WorldInfo::new(name, dimension))
    }

    /// Returns mutable access to a world's properties.
    pub fn world_info_mut(&mut self, world: WorldId) -> Option<&mut WorldInfo> {
        self.worlds.get_mut(&world).map(|w| &mut w.info)
    }

    /// Creates an entity with default data at `position`, loading its chunk if needed,
    /// and attaches it to `world`.
    ///
    /// Panics if the world does not exist. Intended for setting up scenarios.
    #[track_caller]
    pub fn add_entity(
        &mut self,
        world: WorldId,
        kind: EntityKind,
        position: FreePoint,
    ) -> EntityId {
        let id = self.allocate_entity_id();
        let transform = Transform::new(world, position);
        if let Some(chunk) = transform.chunk() {
            self.load_or_generate_chunk(world, chunk);
        }
        match self.spawn_entity(world, Entity::new(id, kind, transform)) {
            Ok(()) => id,
            Err(entity) => panic!("could not attach {entity:?} to {world}"),
        }
    }

    /// Returns the ids of all entities attached to `world`, in ascending order.
    pub fn entity_ids(&self, world: WorldId) -> Vec<EntityId> {
        self.worlds
            .get(&world)
            .map(|w| w.entities.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the number of chunk loads or generations `world` has performed.
    pub fn chunk_load_count(&self, world: WorldId) -> usize {
        self.worlds.get(&world).map_or(0, |w| w.chunk_loads)
    }

    /// Returns the number of cubes in `world` that hold something other than air.
    pub fn non_air_count(&self, world: WorldId) -> usize {
        self.worlds
            .get(&world)
            .map_or(0, |w| w.blocks.values().filter(|b| !b.is_air()).count())
    }
}

impl WorldAccess for Universe {
    fn world_info(&self, world: WorldId) -> Option<&WorldInfo> {
        self.worlds.get(&world).map(|w| &w.info)
    }

    fn block_state(&self, world: WorldId, cube: Cube) -> Option<BlockState> {
        let w = self.worlds.get(&world)?;
        Some(w.blocks.get(&cube).cloned().unwrap_or(BlockState::AIR))
    }

    fn set_block_state(&mut self, world: WorldId, cube: Cube, state: BlockState) -> bool {
        let Some(w) = self.worlds.get_mut(&world) else {
            return false;
        };
        if w.loaded_chunks.insert(ChunkPos::containing(cube)) {
            w.chunk_loads += 1;
        }
        if state.is_air() {
            w.blocks.remove(&cube);
        } else {
            w.blocks.insert(cube, state);
        }
        true
    }

    fn is_chunk_loaded(&self, world: WorldId, chunk: ChunkPos) -> bool {
        self.worlds
            .get(&world)
            .is_some_and(|w| w.loaded_chunks.contains(&chunk))
    }

    fn load_or_generate_chunk(&mut self, world: WorldId, chunk: ChunkPos) -> bool {
        let Some(w) = self.worlds.get_mut(&world) else {
            return false;
        };
        if w.loaded_chunks.insert(chunk) {
            w.chunk_loads += 1;
            log::debug!("loaded {chunk:?} in {world}");
        }
        true
    }

    fn spawn_entity(&mut self, world: WorldId, entity: Entity) -> Result<(), Entity> {
        if entity.is_removed() || self.entity_locations.contains_key(&entity.id()) {
            return Err(entity);
        }
        let Some(w) = self.worlds.get_mut(&world) else {
            return Err(entity);
        };
        let loaded = entity
            .transform()
            .chunk()
            .is_some_and(|chunk| w.loaded_chunks.contains(&chunk));
        if !loaded || entity.transform().world() != world {
            return Err(entity);
        }
        self.entity_locations.insert(entity.id(), world);
        w.entities.insert(entity.id(), entity);
        Ok(())
    }

    fn remove_entity(&mut self, world: WorldId, id: EntityId) -> Option<Entity> {
        let entity = self.worlds.get_mut(&world)?.entities.remove(&id)?;
        self.entity_locations.remove(&id);
        Some(entity)
    }

    fn entity(&self, world: WorldId, id: EntityId) -> Option<&Entity> {
        self.worlds.get(&world)?.entities.get(&id)
    }

    fn entity_mut(&mut self, world: WorldId, id: EntityId) -> Option<&mut Entity> {
        self.worlds.get_mut(&world)?.entities.get_mut(&id)
    }

    fn locate_entity(&self, id: EntityId) -> Option<WorldId> {
        self.entity_locations.get(&id).copied()
    }

    fn allocate_entity_id(&mut self) -> EntityId {
        let id = EntityId(self.next_entity_id);
        self.next_entity_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unwritten_blocks_are_air() {
        let mut u = Universe::new();
        let w = u.create_simple_world("overworld", DimensionKind::Overworld);
        assert_eq!(u.block_state(w, Cube::new(5, 5, 5)), Some(BlockState::AIR));
        assert_eq!(u.block_state(WorldId(99), Cube::ORIGIN), None);
    }

    #[test]
    fn block_write_loads_chunk_once() {
        let mut u = Universe::new();
        let w = u.create_simple_world("overworld", DimensionKind::Overworld);
        let stone = BlockState::new("minecraft:stone");
        assert!(u.set_block_state(w, Cube::new(1, 1, 1), stone.clone()));
        assert!(u.set_block_state(w, Cube::new(2, 1, 1), stone.clone()));
        assert!(u.is_chunk_loaded(w, ChunkPos::new(0, 0)));
        assert_eq!(u.chunk_load_count(w), 1);
        assert_eq!(u.non_air_count(w), 2);
    }

    #[test]
    fn entity_cannot_be_attached_twice() {
        let mut u = Universe::new();
        let a = u.create_simple_world("a", DimensionKind::Overworld);
        let b = u.create_simple_world("b", DimensionKind::Overworld);
        let id = u.add_entity(a, EntityKind::new("minecraft:pig"), FreePoint::new(0.5, 64., 0.5));
        u.load_or_generate_chunk(b, ChunkPos::new(0, 0));

        let mut copy = u.entity(a, id).unwrap().clone();
        copy.set_transform(copy.transform().with_world(b));
        assert!(u.spawn_entity(b, copy).is_err());
        assert_eq!(u.locate_entity(id), Some(a));
    }

    #[test]
    fn spawn_requires_loaded_chunk() {
        let mut u = Universe::new();
        let w = u.create_simple_world("a", DimensionKind::Overworld);
        let id = u.allocate_entity_id();
        let entity = Entity::new(
            id,
            EntityKind::new("minecraft:pig"),
            Transform::new(w, FreePoint::new(100.0, 64.0, 100.0)),
        );
        let entity = u.spawn_entity(w, entity).unwrap_err();
        u.load_or_generate_chunk(w, entity.transform().chunk().unwrap());
        assert!(u.spawn_entity(w, entity).is_ok());
        assert_eq!(u.entity_ids(w), vec![id]);
    }
}
