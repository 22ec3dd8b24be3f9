//! Sparse in-memory voxel world with per-cell palettes.

use std::collections::{BTreeMap, HashMap};

use civscore_core::world::WorldView;
use civscore_types::{BlockPos, CellId};

/// Voxel world storing only non-empty blocks.
///
/// Each cell keeps a count per content name so the scorer can skip cells
/// with nothing weighted in them.
#[derive(Debug, Default)]
pub struct SyntheticWorld {
    blocks: HashMap<BlockPos, &'static str>,
    palettes: HashMap<CellId, BTreeMap<&'static str, u32>>,
}

impl SyntheticWorld {
    /// Create an empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the content at `pos` (`None` clears it). Returns `true` if the
    /// content changed.
    pub fn set(&mut self, pos: BlockPos, content: Option<&'static str>) -> bool {
        let previous = match content {
            Some(name) => self.blocks.insert(pos, name),
            None => self.blocks.remove(&pos),
        };
        if previous == content {
            return false;
        }
        let palette = self.palettes.entry(pos.cell()).or_default();
        if let Some(old) = previous {
            if let Some(count) = palette.get_mut(old) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    palette.remove(old);
                }
            }
        }
        if let Some(name) = content {
            let count = palette.entry(name).or_insert(0);
            *count = count.saturating_add(1);
        }
        true
    }

    /// Number of non-empty blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

impl WorldView for SyntheticWorld {
    fn content_at(&self, pos: BlockPos) -> Option<&str> {
        self.blocks.get(&pos).copied()
    }

    fn cell_palette(&self, cell: CellId) -> Option<Vec<&str>> {
        Some(
            self.palettes
                .get(&cell)
                .map(|palette| palette.keys().copied().collect())
                .unwrap_or_default(),
        )
    }
}
