//! Grouping cubes into chunk columns, the unit in which worlds are loaded.

use core::fmt;

use crate::math::{Cube, FreePoint, GridCoordinate};

/// Edge length of a chunk column, in cubes.
pub const CHUNK_SIZE: GridCoordinate = 16;

/// Base-2 logarithm of [`CHUNK_SIZE`].
const CHUNK_SHIFT: u32 = 4;

/// Identifies a chunk column: every cube whose `x` coordinate is in the half-open range
/// `x * CHUNK_SIZE..(x + 1) * CHUNK_SIZE`, and similarly for `z`, at any height.
///
/// Chunk math is generally just like cube math, but we don't want to confuse the two and
/// forget to multiply or divide.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChunkPos {
    /// Chunk coordinate along the X axis.
    pub x: GridCoordinate,
    /// Chunk coordinate along the Z axis.
    pub z: GridCoordinate,
}

impl ChunkPos {
    /// Construct a [`ChunkPos`] from chunk coordinates
    /// (i.e. successive numbers indicate adjacent chunks).
    pub const fn new(x: GridCoordinate, z: GridCoordinate) -> Self {
        Self { x, z }
    }

    /// Returns the chunk which contains the given cube.
    #[inline]
    pub const fn containing(cube: Cube) -> Self {
        // Arithmetic shift rounds toward negative infinity, as needed.
        Self {
            x: cube.x >> CHUNK_SHIFT,
            z: cube.z >> CHUNK_SHIFT,
        }
    }

    /// Returns the chunk which contains the given point, or [`None`] if the point is
    /// outside the representable grid.
    #[inline]
    pub fn containing_point(point: FreePoint) -> Option<Self> {
        Cube::containing(point).map(Self::containing)
    }
}

impl fmt::Debug for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { x, z } = *self;
        write!(f, "ChunkPos({x}, {z})")
    }
}
