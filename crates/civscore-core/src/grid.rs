//! Grid indexing and neighborhood windows.
//!
//! Maps world positions to fixed-size cubic cells and enumerates the cubic
//! offset windows used by aggregation, delta propagation and the presence
//! sweep. All three walk the same window shape, which is what makes delta
//! propagation symmetric with full aggregation.

use civscore_types::{CellId, WorldPos, CELL_SHIFT, CELL_SIZE};

use crate::config::GridConfig;

/// Displacement between two cells, in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Offset {
    /// X displacement.
    pub dx: i32,
    /// Y displacement.
    pub dy: i32,
    /// Z displacement.
    pub dz: i32,
}

impl Offset {
    /// Squared Euclidean length.
    pub fn dist_sq(self) -> f64 {
        let (x, y, z) = (
            f64::from(self.dx),
            f64::from(self.dy),
            f64::from(self.dz),
        );
        x.mul_add(x, y.mul_add(y, z * z))
    }

    /// Whether every axis lies within `radius` (independent per-axis check).
    pub const fn within_box(self, radius: i32) -> bool {
        self.dx.unsigned_abs() <= radius.unsigned_abs()
            && self.dy.unsigned_abs() <= radius.unsigned_abs()
            && self.dz.unsigned_abs() <= radius.unsigned_abs()
    }

    /// The opposite displacement.
    #[must_use]
    pub const fn reversed(self) -> Self {
        Self {
            dx: self.dx.saturating_neg(),
            dy: self.dy.saturating_neg(),
            dz: self.dz.saturating_neg(),
        }
    }
}

/// Every offset of the cube `[-radius, radius]^3`, in a fixed order.
pub fn window(radius: i32) -> impl Iterator<Item = Offset> {
    let r = radius.max(0);
    (-r..=r).flat_map(move |dx| {
        (-r..=r).flat_map(move |dy| (-r..=r).map(move |dz| Offset { dx, dy, dz }))
    })
}

/// Pure mapping from world positions to cells, plus the world's vertical
/// extent in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridIndex {
    min_y: i32,
    max_y: i32,
}

impl GridIndex {
    /// Create an index for the configured vertical bounds.
    pub const fn new(config: &GridConfig) -> Self {
        Self {
            min_y: config.min_y,
            max_y: config.max_y,
        }
    }

    /// Return the cell containing `pos`.
    pub fn cell_of(pos: WorldPos) -> CellId {
        pos.cell()
    }

    /// Lowest cell Y index inside the world.
    pub const fn min_sy(&self) -> i32 {
        self.min_y >> CELL_SHIFT
    }

    /// Highest cell Y index inside the world.
    pub const fn max_sy(&self) -> i32 {
        self.max_y.saturating_sub(1) >> CELL_SHIFT
    }

    /// Whether any block of `cell` lies within the vertical bounds.
    pub const fn contains(&self, cell: CellId) -> bool {
        cell.sy >= self.min_sy() && cell.sy <= self.max_sy()
    }

    /// The block Y range `[start, end)` of `cell` clipped to the world, or
    /// `None` if the cell lies entirely outside it.
    pub fn block_span_y(&self, cell: CellId) -> Option<(i32, i32)> {
        let base = cell.sy.saturating_mul(CELL_SIZE);
        let start = base.max(self.min_y);
        let end = base.saturating_add(CELL_SIZE).min(self.max_y);
        (start < end).then_some((start, end))
    }
}
