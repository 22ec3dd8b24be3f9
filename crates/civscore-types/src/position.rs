//! World coordinates.
//!
//! [`BlockPos`] addresses one voxel. [`WorldPos`] is a continuous position
//! (agents, query points) that floors onto a block.

use serde::{Deserialize, Serialize};

use crate::ids::{CellId, CELL_SHIFT};

/// Integer coordinates of a single voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    /// X coordinate.
    pub x: i32,
    /// Y (vertical) coordinate.
    pub y: i32,
    /// Z coordinate.
    pub z: i32,
}

impl BlockPos {
    /// Create a block position.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Return the grid cell containing this block.
    ///
    /// Arithmetic shift floors toward negative infinity, so block `-1`
    /// belongs to cell `-1`, not cell `0`.
    pub const fn cell(self) -> CellId {
        CellId {
            cx: self.x >> CELL_SHIFT,
            cz: self.z >> CELL_SHIFT,
            sy: self.y >> CELL_SHIFT,
        }
    }
}

/// Continuous world position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldPos {
    /// X coordinate.
    pub x: f64,
    /// Y (vertical) coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
}

impl WorldPos {
    /// Create a world position.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Floor onto the containing block.
    ///
    /// Non-finite components map to 0 and out-of-range values saturate.
    #[allow(clippy::cast_possible_truncation)]
    pub fn block(self) -> BlockPos {
        // `as` from f64 saturates and maps NaN to 0.
        BlockPos {
            x: self.x.floor() as i32,
            y: self.y.floor() as i32,
            z: self.z.floor() as i32,
        }
    }

    /// Return the grid cell containing this position.
    pub fn cell(self) -> CellId {
        self.block().cell()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_blocks_floor_into_negative_cells() {
        assert_eq!(BlockPos::new(-1, -1, -1).cell(), CellId::new(-1, -1, -1));
        assert_eq!(BlockPos::new(-16, 0, 0).cell(), CellId::new(-1, 0, 0));
        assert_eq!(BlockPos::new(-17, 0, 0).cell(), CellId::new(-2, 0, 0));
    }

    #[test]
    fn cell_boundaries() {
        assert_eq!(BlockPos::new(15, 15, 15).cell(), CellId::new(0, 0, 0));
        assert_eq!(BlockPos::new(16, 31, 47).cell(), CellId::new(1, 2, 1));
    }

    #[test]
    fn world_pos_floors() {
        let pos = WorldPos::new(-0.5, 64.9, 15.99);
        assert_eq!(pos.block(), BlockPos::new(-1, 64, 15));
        assert_eq!(pos.cell(), CellId::new(-1, 0, 4));
    }

    #[test]
    fn non_finite_positions_do_not_panic() {
        let pos = WorldPos::new(f64::NAN, f64::INFINITY, f64::NEG_INFINITY);
        let block = pos.block();
        assert_eq!(block.x, 0);
        assert_eq!(block.y, i32::MAX);
        assert_eq!(block.z, i32::MIN);
    }
}
