//! Grid cell and agent identifiers.
//!
//! A [`CellId`] names one fixed-size cubic region of the voxel world and is
//! the key of every cache and of the durable shard table. Components are
//! ordered `(cx, cz, sy)` to match the persisted primary key.

use serde::{Deserialize, Serialize};

use crate::position::BlockPos;

/// Edge length of a cubic grid cell, in blocks.
pub const CELL_SIZE: i32 = 16;

/// `log2(CELL_SIZE)`, used to map block coordinates to cells.
pub const CELL_SHIFT: u32 = 4;

/// Integer coordinates of a fixed-size cubic grid cell.
///
/// Two cells are equal iff all three components match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId {
    /// Cell index along the world X axis.
    pub cx: i32,
    /// Cell index along the world Z axis.
    pub cz: i32,
    /// Cell index along the world Y (vertical) axis.
    pub sy: i32,
}

impl CellId {
    /// Create a cell identifier from its three components.
    pub const fn new(cx: i32, cz: i32, sy: i32) -> Self {
        Self { cx, cz, sy }
    }

    /// Return the cell displaced by `(dx, dy, dz)` cells.
    ///
    /// Saturates at the `i32` range instead of wrapping.
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            cx: self.cx.saturating_add(dx),
            cz: self.cz.saturating_add(dz),
            sy: self.sy.saturating_add(dy),
        }
    }

    /// Return the block with the lowest coordinates inside this cell.
    pub const fn min_block(self) -> BlockPos {
        BlockPos {
            x: self.cx.saturating_mul(CELL_SIZE),
            y: self.sy.saturating_mul(CELL_SIZE),
            z: self.cz.saturating_mul(CELL_SIZE),
        }
    }
}

impl core::fmt::Display for CellId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}, {}, {})", self.cx, self.cz, self.sy)
    }
}

/// Stable identifier of an active agent, assigned by the host.
///
/// Used by the presence sweep to notice when an agent has changed cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentKey(pub u64);

impl AgentKey {
    /// Return the inner value.
    pub const fn into_inner(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for AgentKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}
