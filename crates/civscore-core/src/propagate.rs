//! Mutation entry point: recompute one cell and patch cached aggregates.

use civscore_db::ShardStore;
use civscore_types::CellId;

use crate::aggregate::Aggregation;
use crate::info::{InfoShardCache, InfoShardComputer};
use crate::result::ResultShardCache;
use crate::world::WorldView;

/// What a content change did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellChange {
    /// The recomputed cell.
    pub cell: CellId,
    /// Score before the change (0 if never scanned).
    pub old_score: f64,
    /// Freshly computed score.
    pub new_score: f64,
    /// `new_score - old_score`.
    pub delta: f64,
    /// Cached result entries patched by the delta.
    pub entries_updated: usize,
}

/// Borrowed view of the engine parts a mutation touches.
///
/// Mutation cost is bounded by the aggregation window, not by how many
/// result entries are cached.
pub struct DeltaPropagator<'a> {
    /// Cell scorer.
    pub computer: &'a InfoShardComputer,
    /// Info score cache.
    pub info: &'a mut InfoShardCache,
    /// Result entry cache.
    pub results: &'a mut ResultShardCache,
    /// Durable store.
    pub store: &'a dyn ShardStore,
    /// Current aggregation tunables.
    pub aggregation: &'a Aggregation,
}

impl DeltaPropagator<'_> {
    /// Recompute `cell`, store the new score and fan the delta out.
    ///
    /// The previous score comes from the hot cache or a durable point read,
    /// never from a recompute. Everything is applied before returning, so
    /// the next query observes the change.
    pub fn on_cell_content_changed(
        &mut self,
        world: &dyn WorldView,
        cell: CellId,
        now_wall: i64,
    ) -> CellChange {
        let old_score = self
            .info
            .get_or_load(cell, now_wall, self.store)
            .unwrap_or(0.0);
        let new_score = self.computer.compute(world, cell);
        self.info.put(cell, new_score, now_wall, self.store);

        let delta = new_score - old_score;
        let entries_updated = self
            .results
            .propagate_delta(cell, delta, self.aggregation, now_wall);
        tracing::trace!(%cell, old_score, new_score, entries_updated, "Cell content changed");
        CellChange {
            cell,
            old_score,
            new_score,
            delta,
            entries_updated,
        }
    }
}
