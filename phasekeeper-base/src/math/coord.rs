//! Numeric types used for coordinates and related quantities.

use euclid::{Point3D, Vector3D};

use crate::math::Cube;

/// Coordinates of [`Cube`]s.
pub type GridCoordinate = i32;

/// Coordinates of entity positions, rotations, and scales.
///
/// Every [`GridCoordinate`] converts to this exactly.
pub type FreeCoordinate = f64;

/// Entity positions.
pub type FreePoint = Point3D<FreeCoordinate, Cube>;

/// Entity velocities. Also used for rotations (pitch, yaw, roll in degrees) and scales,
/// which share the three-component shape.
pub type FreeVector = Vector3D<FreeCoordinate, Cube>;
