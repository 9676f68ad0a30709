use core::fmt;

use crate::math::{FreeCoordinate, FreePoint, GridCoordinate};

/// One block-sized cell of a world, identified by the integer coordinates of its most
/// negative corner.
///
/// Block states are stored per cube; entity positions are [`FreePoint`]s, and the cube
/// an entity stands in is found with [`Cube::containing()`]. On each axis a cube spans the
/// half-open interval from its coordinate (inclusive) to the next integer (exclusive).
///
/// Keeping cubes apart from points avoids the off-by-one errors that come from treating a
/// floored entity position as if it were the position itself.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub struct Cube {
    pub x: GridCoordinate,
    pub y: GridCoordinate,
    pub z: GridCoordinate,
}

impl Cube {
    /// The cube whose most negative corner is the origin.
    pub const ORIGIN: Self = Self::new(0, 0, 0);

    #[allow(missing_docs)]
    #[inline]
    pub const fn new(x: GridCoordinate, y: GridCoordinate, z: GridCoordinate) -> Self {
        Self { x, y, z }
    }

    /// Returns the cube an entity at `point` occupies, or [`None`] if `point` is not
    /// finite or lies outside the range of [`GridCoordinate`].
    ///
    /// ```
    /// use phasekeeper_base::math::{FreePoint, Cube};
    ///
    /// assert_eq!(Cube::containing(FreePoint::new(1.0, 64.5, -2.5)), Some(Cube::new(1, 64, -3)));
    /// ```
    #[inline]
    pub fn containing(point: FreePoint) -> Option<Self> {
        const LOW: FreeCoordinate = GridCoordinate::MIN as FreeCoordinate;
        const HIGH: FreeCoordinate = GridCoordinate::MAX as FreeCoordinate + 1.0;

        let in_range = |c: FreeCoordinate| (LOW..HIGH).contains(&c);
        let FreePoint { x, y, z, .. } = point;
        if in_range(x) && in_range(y) && in_range(z) {
            Some(Self::new(
                x.floor() as GridCoordinate,
                y.floor() as GridCoordinate,
                z.floor() as GridCoordinate,
            ))
        } else {
            None
        }
    }

    /// Returns the point at the center of the bottom face of this cube, which is where an
    /// entity placed “on” this cube stands.
    #[inline]
    pub fn standing_point(self) -> FreePoint {
        let Self { x, y, z } = self;
        FreePoint::new(
            FreeCoordinate::from(x) + 0.5,
            FreeCoordinate::from(y),
            FreeCoordinate::from(z) + 0.5,
        )
    }
}

impl fmt::Debug for Cube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { x, y, z } = self;
        write!(f, "({x:+}, {y:+}, {z:+})")
    }
}

impl From<[GridCoordinate; 3]> for Cube {
    #[inline]
    fn from([x, y, z]: [GridCoordinate; 3]) -> Self {
        Self { x, y, z }
    }
}
