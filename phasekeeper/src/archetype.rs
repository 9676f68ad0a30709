//! World-independent descriptions of entities, and the registry used to construct
//! entities from them.

use hashbrown::HashMap;
use serde_json::Value;

use crate::entity::{Entity, EntityData, EntityId, EntityKind, UniqueId, keys};
use crate::math::FreePoint;
use crate::tracker::{SpawnOutcome, TrackingSession};
use crate::transform::Transform;
use crate::util::ErrorChain;
use crate::world::{WorldAccess, WorldId};


// -------------------------------------------------------------------------------------------------

/// Constructs a live entity of a known kind from persisted data.
///
/// The data may contain the [reserved keys](keys); constructors should take position and
/// kind from their arguments rather than from the data.
pub type Constructor =
    fn(EntityId, EntityKind, Transform, &EntityData) -> Result<Entity, MaterializeError>;

/// How an entity of a given kind is moved to another world.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum TransferStrategy {
    /// Detach the entity and attach the same instance to the destination.
    #[default]
    Relocate,
    /// Construct a new entity from the old one's persisted data, then discard the old one.
    Recreate,
}

#[derive(Clone, Copy, Debug)]
struct KindEntry {
    constructor: Constructor,
    transfer: TransferStrategy,
}

/// Maps [`EntityKind`]s to how they are constructed and transferred.
#[derive(Clone, Debug, Default)]
pub struct EntityRegistry {
    kinds: HashMap<EntityKind, KindEntry>,
}

impl EntityRegistry {
    /// Constructs an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a registry containing players and items, using
    /// [`EntityRegistry::standard_constructor()`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            EntityKind::PLAYER,
            Self::standard_constructor,
            TransferStrategy::Relocate,
        );
        registry.register(
            EntityKind::ITEM,
            Self::standard_constructor,
            TransferStrategy::Relocate,
        );
        registry
    }

    /// Registers a kind. If it was already registered, the new registration replaces the
    /// old one and a warning is logged.
    pub fn register(
        &mut self,
        kind: EntityKind,
        constructor: Constructor,
        transfer: TransferStrategy,
    ) -> &mut Self {
        let entry = KindEntry {
            constructor,
            transfer,
        };
        if let Some(previous) = self.kinds.insert(kind.clone(), entry) {
            log::warn!(
                "entity kind {kind:?} registered twice; replacing {:?} transfer with {transfer:?}",
                previous.transfer
            );
        }
        self
    }

    /// Constructs an entity with no behavior beyond [`Entity::read_data()`].
    pub fn standard_constructor(
        id: EntityId,
        kind: EntityKind,
        transform: Transform,
        data: &EntityData,
    ) -> Result<Entity, MaterializeError> {
        let mut entity = Entity::new(id, kind, transform);
        entity.read_data(data)?;
        Ok(entity)
    }

    #[allow(missing_docs)]
    pub fn is_registered(&self, kind: &EntityKind) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Returns how entities of `kind` are moved between worlds. Unregistered kinds are
    /// relocated.
    pub fn transfer_strategy(&self, kind: &EntityKind) -> TransferStrategy {
        self.kinds
            .get(kind)
            .map_or(TransferStrategy::Relocate, |entry| entry.transfer)
    }

    /// Constructs a live entity, which is not yet attached to any world.
    pub fn materialize(
        &self,
        id: EntityId,
        kind: &EntityKind,
        transform: Transform,
        data: &EntityData,
    ) -> Result<Entity, MaterializeError> {
        let entry = self
            .kinds
            .get(kind)
            .ok_or_else(|| MaterializeError::UnknownKind(kind.clone()))?;
        if !transform.is_finite() {
            return Err(MaterializeError::NonFinitePosition);
        }
        (entry.constructor)(id, kind.clone(), transform, data)
    }
}

// -------------------------------------------------------------------------------------------------

/// Error from materializing an entity.
#[derive(Clone, Debug, Eq, PartialEq, displaydoc::Display)]
#[non_exhaustive]
pub enum MaterializeError {
    /// entity kind {0:?} is not registered
    UnknownKind(EntityKind),
    /// persisted value for {key:?} is malformed
    InvalidData {
        /// The reserved key whose value could not be read.
        key: &'static str,
    },
    /// entity position is not finite
    NonFinitePosition,
    /// there is no {0}
    NoSuchWorld(WorldId),
}

impl std::error::Error for MaterializeError {}

/// Error from [`EntityArchetype::from_data()`].
#[derive(Clone, Debug, Eq, PartialEq, displaydoc::Display)]
#[non_exhaustive]
pub enum ArchetypeError {
    /// persisted data has no entity kind
    MissingKind,
    /// persisted entity kind is not a string: {0}
    InvalidKind(Value),
}

impl std::error::Error for ArchetypeError {}

// -------------------------------------------------------------------------------------------------

/// An entity kind plus persisted data, without identity or location.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EntityArchetype {
    kind: EntityKind,
    /// Never contains `"id"`, `"Pos"`, or `"UUID"`.
    data: EntityData,
}

impl EntityArchetype {
    /// Constructs an archetype with no data.
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            data: EntityData::new(),
        }
    }

    /// Captures the persisted state of a live entity.
    pub fn from_entity(entity: &Entity) -> Self {
        Self {
            kind: entity.kind().clone(),
            data: strip_identity(entity.write_data()),
        }
    }

    /// Interprets raw persisted data, which must name the kind under `"id"`.
    pub fn from_data(data: EntityData) -> Result<Self, ArchetypeError> {
        let kind = match data.get(keys::KIND) {
            None => return Err(ArchetypeError::MissingKind),
            Some(Value::String(kind)) => EntityKind::new(kind.as_str()),
            Some(other) => return Err(ArchetypeError::InvalidKind(other.clone())),
        };
        Ok(Self {
            kind,
            data: strip_identity(data),
        })
    }

    #[allow(missing_docs)]
    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    #[allow(missing_docs)]
    pub fn data(&self) -> &EntityData {
        &self.data
    }

    /// Sets a persisted value. Values for `"id"`, `"Pos"`, and `"UUID"` are ignored.
    pub fn set_data(&mut self, key: &str, value: Value) {
        if !is_identity_key(key) {
            self.data.insert(key, value);
        }
    }

    /// Constructs a new live entity at `transform`, with a fresh id and unique id.
    /// The entity is not attached to any world.
    pub fn try_apply(
        &self,
        registry: &EntityRegistry,
        worlds: &mut dyn WorldAccess,
        transform: Transform,
    ) -> Result<Entity, MaterializeError> {
        if worlds.world_info(transform.world()).is_none() {
            return Err(MaterializeError::NoSuchWorld(transform.world()));
        }
        let data = self.data_at(transform.position());
        let id = worlds.allocate_entity_id();
        registry.materialize(id, &self.kind, transform, &data)
    }

    /// Like [`EntityArchetype::try_apply()`], but logs and discards the error.
    pub fn apply(
        &self,
        registry: &EntityRegistry,
        worlds: &mut dyn WorldAccess,
        transform: Transform,
    ) -> Option<Entity> {
        match self.try_apply(registry, worlds, transform) {
            Ok(entity) => Some(entity),
            Err(error) => {
                log::debug!("could not materialize {:?}: {}", self.kind, ErrorChain(&error));
                None
            }
        }
    }

    /// Materializes an entity and spawns it through `session`, so that the current phase's
    /// spawn policy applies.
    pub fn spawn(
        &self,
        registry: &EntityRegistry,
        session: &TrackingSession,
        worlds: &mut dyn WorldAccess,
        transform: Transform,
    ) -> Result<(EntityId, SpawnOutcome), MaterializeError> {
        let entity = self.try_apply(registry, worlds, transform)?;
        let id = entity.id();
        Ok((id, session.spawn_entity(worlds, entity)))
    }

    /// Returns the data to construct from: the archetype's data plus kind and position.
    fn data_at(&self, position: FreePoint) -> EntityData {
        let mut data = self.data.clone();
        data.insert(keys::KIND, Value::from(self.kind.id().as_str()));
        data.insert(
            keys::POS,
            Value::Array(position.to_array().into_iter().map(Value::from).collect()),
        );
        data
    }
}

fn is_identity_key(key: &str) -> bool {
    matches!(key, keys::KIND | keys::POS | keys::UUID)
}

fn strip_identity(data: EntityData) -> EntityData {
    data.iter()
        .filter(|(k, _)| !is_identity_key(k))
        .map(|(k, v)| (k.to_owned(), v.clone()))
        .collect()
}

// -------------------------------------------------------------------------------------------------

/// An entity's persisted state together with its identity and, optionally, a location.
///
/// Unlike an [`EntityArchetype`], restoring a snapshot keeps the entity's [`UniqueId`].
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EntitySnapshot {
    unique_id: UniqueId,
    archetype: EntityArchetype,
    transform: Option<Transform>,
}

impl EntitySnapshot {
    /// Captures a live entity, including where it is.
    pub fn from_entity(entity: &Entity) -> Self {
        Self {
            unique_id: entity.unique_id(),
            archetype: EntityArchetype::from_entity(entity),
            transform: Some(entity.transform()),
        }
    }

    /// Returns a copy located at `transform`.
    #[must_use]
    pub fn with_transform(self, transform: Transform) -> Self {
        Self {
            transform: Some(transform),
            ..self
        }
    }

    /// Returns a copy with no location.
    #[must_use]
    pub fn without_transform(self) -> Self {
        Self {
            transform: None,
            ..self
        }
    }

    #[allow(missing_docs)]
    pub fn unique_id(&self) -> UniqueId {
        self.unique_id
    }

    #[allow(missing_docs)]
    pub fn kind(&self) -> &EntityKind {
        self.archetype.kind()
    }

    #[allow(missing_docs)]
    pub fn transform(&self) -> Option<Transform> {
        self.transform
    }

    /// Returns the archetype, discarding identity and location.
    pub fn to_archetype(&self) -> EntityArchetype {
        self.archetype.clone()
    }

    /// Recreates the entity with a new [`EntityId`] but the same [`UniqueId`].
    /// Returns [`None`] if there is no location or materialization fails.
    /// The entity is not attached to any world.
    pub fn restore(
        &self,
        registry: &EntityRegistry,
        worlds: &mut dyn WorldAccess,
    ) -> Option<Entity> {
        let transform = self.transform?;
        let mut entity = self.archetype.apply(registry, worlds, transform)?;
        entity.set_unique_id(self.unique_id);
        Some(entity)
    }
}
