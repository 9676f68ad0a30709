//! [`Transform`], the logical location of an entity.

use crate::math::{ChunkPos, Cube, FreeCoordinate, FreePoint, FreeVector};
use crate::world::WorldId;

/// Where an entity logically is: owning world, position, orientation, and scale.
///
/// Transforms are plain values. Changing one produces a new transform; see the `with_*`
/// methods.
///
/// Rotation is stored as `(pitch, yaw, roll)` in degrees.
#[derive(Clone, Copy, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Transform {
    world: WorldId,
    position: FreePoint,
    rotation: FreeVector,
    scale: FreeVector,
}

impl Transform {
    /// Constructs a transform at `position` in `world`, with no rotation and unit scale.
    pub fn new(world: WorldId, position: FreePoint) -> Self {
        Self {
            world,
            position,
            rotation: FreeVector::zero(),
            scale: FreeVector::new(1.0, 1.0, 1.0),
        }
    }

    /// Returns the world this transform is in.
    pub fn world(&self) -> WorldId {
        self.world
    }

    /// Returns the position within the world.
    pub fn position(&self) -> FreePoint {
        self.position
    }

    /// Returns the rotation, as `(pitch, yaw, roll)` in degrees.
    pub fn rotation(&self) -> FreeVector {
        self.rotation
    }

    #[allow(missing_docs)]
    pub fn scale(&self) -> FreeVector {
        self.scale
    }

    /// Returns a copy of this transform in a different world, at the same coordinates.
    #[must_use]
    pub fn with_world(self, world: WorldId) -> Self {
        Self { world, ..self }
    }

    /// Returns a copy of this transform with a different position.
    #[must_use]
    pub fn with_position(self, position: FreePoint) -> Self {
        Self { position, ..self }
    }

    /// Returns a copy of this transform with a different rotation.
    #[must_use]
    pub fn with_rotation(self, rotation: FreeVector) -> Self {
        Self { rotation, ..self }
    }

    /// Returns a copy of this transform with a different scale.
    #[must_use]
    pub fn with_scale(self, scale: FreeVector) -> Self {
        Self { scale, ..self }
    }

    /// Returns the cube containing the position, or [`None`] if it is out of range.
    pub fn cube(&self) -> Option<Cube> {
        Cube::containing(self.position)
    }

    /// Returns the chunk containing the position, or [`None`] if it is out of range.
    pub fn chunk(&self) -> Option<ChunkPos> {
        ChunkPos::containing_point(self.position)
    }

    /// Whether every coordinate of the position is finite.
    pub fn is_finite(&self) -> bool {
        let FreePoint { x, y, z, .. } = self.position;
        [x, y, z].into_iter().all(FreeCoordinate::is_finite)
    }
}
