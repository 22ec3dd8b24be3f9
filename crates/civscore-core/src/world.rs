//! Read-only access to world contents.
//!
//! The engine never owns the world. Hosts implement [`WorldView`] over
//! their own voxel storage and pass it into every call that may need to
//! scan a cell.

use civscore_types::{BlockPos, CellId};

/// Read-only view of voxel contents.
pub trait WorldView {
    /// Name of the content at `pos`, or `None` for empty space.
    fn content_at(&self, pos: BlockPos) -> Option<&str>;

    /// Every distinct content name present in `cell`, if the world keeps a
    /// per-cell palette. Used as an O(1) pre-filter before enumeration.
    fn cell_palette(&self, _cell: CellId) -> Option<Vec<&str>> {
        None
    }
}

/// Origin of a content change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationOrigin {
    /// A direct change, such as an agent placing or breaking a block.
    /// Processed before the notification returns.
    Primary,
    /// A knock-on change caused by another mutation (falling blocks, fluid
    /// spread, cascading breaks). Coalesced per cell and processed on the
    /// next tick.
    Cascade,
}
