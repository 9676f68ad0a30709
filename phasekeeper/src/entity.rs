//! Live entities and their persisted data.

use core::fmt;

use arcstr::ArcStr;
use serde_json::Value;

use crate::archetype::MaterializeError;
use crate::math::{FreePoint, FreeVector};
use crate::transform::Transform;
use crate::world::WorldId;

/// Keys of [`EntityData`] which are owned by the tracking core rather than by the entity.
///
/// These are injected by [`Entity::write_data()`], and stripped or replaced around
/// materialization.
pub mod keys {
    /// The entity kind, as a string.
    pub const KIND: &str = "id";
    /// Position, as an array of three numbers.
    pub const POS: &str = "Pos";
    /// Unique id, as a hexadecimal string.
    pub const UUID: &str = "UUID";
    /// Velocity, as an array of three numbers.
    pub const MOTION: &str = "Motion";
    /// Rotation, as an array of three numbers (pitch, yaw, roll).
    pub const ROTATION: &str = "Rotation";

    /// All reserved keys.
    pub const ALL: [&str; 5] = [KIND, POS, UUID, MOTION, ROTATION];

    /// Whether `key` is one of the reserved keys.
    pub fn is_reserved(key: &str) -> bool {
        ALL.contains(&key)
    }
}

// -------------------------------------------------------------------------------------------------

/// Identifies a live entity within one [`WorldAccess`](crate::world::WorldAccess).
///
/// Ids are never reused; an entity that is recreated gets a new id.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize)]
pub struct EntityId(pub u64);

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}
impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Persistent identity of an entity, which survives being recreated.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize)]
pub struct UniqueId(pub u128);

impl UniqueId {
    /// Derives a fresh unique id for a newly allocated entity.
    pub fn for_new_entity(id: EntityId) -> Self {
        // Spread the sequential id over both halves so that ids from different sources
        // are unlikely to collide.
        Self((u128::from(id.0) << 64) | u128::from(id.0.wrapping_mul(0x9E37_79B9_7F4A_7C15)))
    }

    fn parse(text: &str) -> Option<Self> {
        u128::from_str_radix(text, 16).ok().map(Self)
    }
}

impl fmt::Debug for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// The kind of an entity, such as `"minecraft:pig"`.
///
/// Kinds determine how an entity is constructed and how it is moved between worlds;
/// see [`EntityRegistry`](crate::archetype::EntityRegistry).
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct EntityKind(ArcStr);

impl EntityKind {
    /// Players.
    pub const PLAYER: Self = Self(arcstr::literal!("minecraft:player"));
    /// Dropped items.
    pub const ITEM: Self = Self(arcstr::literal!("minecraft:item"));

    #[allow(missing_docs)]
    pub fn new(id: impl Into<ArcStr>) -> Self {
        Self(id.into())
    }

    #[allow(missing_docs)]
    pub fn id(&self) -> &ArcStr {
        &self.0
    }
}

impl fmt::Debug for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque key-value persisted state of an entity.
///
/// The tracking core only interprets the [reserved keys](keys).
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct EntityData(serde_json::Map<String, Value>);

impl EntityData {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(missing_docs)]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Sets a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    #[allow(missing_docs)]
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    #[allow(missing_docs)]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a copy without any of the reserved keys.
    #[must_use]
    pub fn without_reserved(&self) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| !keys::is_reserved(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Reads a value stored as an array of three numbers.
    pub(crate) fn get_vector(
        &self,
        key: &'static str,
    ) -> Result<Option<[f64; 3]>, MaterializeError> {
        let Some(value) = self.0.get(key) else {
            return Ok(None);
        };
        let invalid = || MaterializeError::InvalidData { key };
        let array = value.as_array().ok_or_else(invalid)?;
        match array.as_slice() {
            [x, y, z] => Ok(Some([
                x.as_f64().ok_or_else(invalid)?,
                y.as_f64().ok_or_else(invalid)?,
                z.as_f64().ok_or_else(invalid)?,
            ])),
            _ => Err(invalid()),
        }
    }
}

impl FromIterator<(String, Value)> for EntityData {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn vector_value(v: [f64; 3]) -> Value {
    Value::Array(v.into_iter().map(Value::from).collect())
}

// -------------------------------------------------------------------------------------------------

/// A live entity.
#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    id: EntityId,
    unique_id: UniqueId,
    kind: EntityKind,
    transform: Transform,
    velocity: FreeVector,
    /// Persisted state other than the reserved keys.
    data: EntityData,
    removed: bool,
}

impl Entity {
    /// Constructs an entity with no extra data and zero velocity.
    pub fn new(id: EntityId, kind: EntityKind, transform: Transform) -> Self {
        Self {
            id,
            unique_id: UniqueId::for_new_entity(id),
            kind,
            transform,
            velocity: FreeVector::zero(),
            data: EntityData::new(),
            removed: false,
        }
    }

    #[allow(missing_docs)]
    pub fn id(&self) -> EntityId {
        self.id
    }

    #[allow(missing_docs)]
    pub fn unique_id(&self) -> UniqueId {
        self.unique_id
    }

    /// Replaces the unique id, for recreating an entity with the same identity.
    pub fn set_unique_id(&mut self, unique_id: UniqueId) {
        self.unique_id = unique_id;
    }

    #[allow(missing_docs)]
    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    /// Whether this entity is a player.
    pub fn is_player(&self) -> bool {
        self.kind == EntityKind::PLAYER
    }

    #[allow(missing_docs)]
    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Sets the transform. This does not move the entity between worlds' live-entity
    /// sets; use [`transfer`](crate::transfer) for that.
    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    #[allow(missing_docs)]
    pub fn world(&self) -> WorldId {
        self.transform.world()
    }

    #[allow(missing_docs)]
    pub fn velocity(&self) -> FreeVector {
        self.velocity
    }

    #[allow(missing_docs)]
    pub fn set_velocity(&mut self, velocity: FreeVector) {
        self.velocity = velocity;
    }

    /// The persisted state, excluding the reserved keys.
    pub fn data(&self) -> &EntityData {
        &self.data
    }

    /// Sets a persisted value. Reserved keys are ignored; use the dedicated setters.
    pub fn set_data(&mut self, key: &str, value: Value) {
        if keys::is_reserved(key) {
            log::debug!("ignoring write of reserved key {key:?} on {:?}", self.id);
            return;
        }
        self.data.insert(key, value);
    }

    /// Whether the entity has been removed from the game and must not be attached to any
    /// world again.
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Marks the entity removed.
    pub fn mark_removed(&mut self) {
        self.removed = true;
    }

    /// Serializes the complete persisted state, including the reserved keys.
    pub fn write_data(&self) -> EntityData {
        let mut data = self.data.clone();
        let FreePoint { x, y, z, .. } = self.transform.position();
        data.insert(keys::KIND, Value::from(self.kind.id().as_str()));
        data.insert(keys::POS, vector_value([x, y, z]));
        data.insert(keys::UUID, Value::from(format!("{:?}", self.unique_id)));
        data.insert(keys::MOTION, vector_value(self.velocity.to_array()));
        data.insert(keys::ROTATION, vector_value(self.transform.rotation().to_array()));
        data
    }

    /// Loads persisted state written by [`Entity::write_data()`].
    ///
    /// Non-reserved keys replace this entity's data. `"Motion"`, `"Rotation"`, and
    /// `"UUID"` are applied if present. `"id"` and `"Pos"` are ignored, since the kind and
    /// location are decided by whoever constructed this entity.
    ///
    /// On error, the entity is left unchanged.
    pub fn read_data(&mut self, data: &EntityData) -> Result<(), MaterializeError> {
        let motion = data.get_vector(keys::MOTION)?;
        let rotation = data.get_vector(keys::ROTATION)?;
        let unique_id = match data.get(keys::UUID) {
            None => None,
            Some(value) => Some(
                value
                    .as_str()
                    .and_then(UniqueId::parse)
                    .ok_or(MaterializeError::InvalidData { key: keys::UUID })?,
            ),
        };

        self.data = data.without_reserved();
        if let Some(motion) = motion {
            self.velocity = FreeVector::from(motion);
        }
        if let Some(rotation) = rotation {
            self.transform = self.transform.with_rotation(FreeVector::from(rotation));
        }
        if let Some(unique_id) = unique_id {
            self.unique_id = unique_id;
        }
        Ok(())
    }
}
