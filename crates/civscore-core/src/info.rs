//! Info shards: the raw civilization score of a single cell.
//!
//! [`InfoShardComputer`] scans one cell of the world. [`InfoShardCache`]
//! keeps recent scores hot, refreshing a TTL on every touch, and writes
//! every new score through to the durable store. Evicted scores stay
//! recoverable from the store.

use std::collections::{HashMap, HashSet};

use civscore_db::{LoadedScore, ShardStore};
use civscore_types::{BlockPos, CellId, CELL_SIZE};

use crate::config::{GridConfig, ScoringConfig};
use crate::grid::GridIndex;
use crate::scoring::WeightTable;
use crate::world::WorldView;

/// Computes the normalized score of one cell from world contents.
#[derive(Debug, Clone)]
pub struct InfoShardComputer {
    grid: GridIndex,
    weights: WeightTable,
    normalization_factor: f64,
}

impl InfoShardComputer {
    /// Build a computer from the grid and scoring configuration.
    pub fn new(grid: &GridConfig, scoring: &ScoringConfig) -> Self {
        Self {
            grid: GridIndex::new(grid),
            weights: WeightTable::new(scoring.rules.clone()),
            normalization_factor: scoring.normalization_factor,
        }
    }

    /// Score `cell` in `[0, 1]`.
    ///
    /// Cells entirely outside the vertical bounds score 0. When the world
    /// offers a palette and nothing in it carries weight, the cell scores 0
    /// without being enumerated.
    pub fn compute(&self, world: &dyn WorldView, cell: CellId) -> f64 {
        let Some((y_start, y_end)) = self.grid.block_span_y(cell) else {
            return 0.0;
        };
        if let Some(palette) = world.cell_palette(cell) {
            if !palette.iter().any(|content| self.weights.is_weighted(content)) {
                return 0.0;
            }
        }

        let origin = cell.min_block();
        let mut total = 0.0;
        for y in y_start..y_end {
            for dz in 0..CELL_SIZE {
                for dx in 0..CELL_SIZE {
                    let pos = BlockPos::new(
                        origin.x.saturating_add(dx),
                        y,
                        origin.z.saturating_add(dz),
                    );
                    if let Some(content) = world.content_at(pos) {
                        total += self.weights.weight(content);
                    }
                }
            }
        }
        normalize_weight(total, self.normalization_factor)
    }
}

/// `min(1, total / factor)`, with non-finite input mapped to 0.
fn normalize_weight(total: f64, factor: f64) -> f64 {
    let score = total / factor;
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 1.0)
}

/// A hot info shard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InfoShard {
    /// Score in `[0, 1]`.
    pub score: f64,
    /// Wall-clock time of the last touch.
    pub touched_at: i64,
}

/// TTL-refreshed hot map from cell to info score.
#[derive(Debug)]
pub struct InfoShardCache {
    shards: HashMap<CellId, InfoShard>,
    /// Cells with an asynchronous load in flight. A write removes the cell,
    /// so the stale load is discarded when it lands.
    pending_loads: HashSet<CellId>,
    ttl_ms: i64,
}

impl InfoShardCache {
    /// Create an empty cache.
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            shards: HashMap::new(),
            pending_loads: HashSet::new(),
            ttl_ms,
        }
    }

    const fn is_expired(&self, shard: &InfoShard, now_wall: i64) -> bool {
        now_wall.saturating_sub(shard.touched_at) > self.ttl_ms
    }

    /// Return the hot score for `cell`, refreshing its TTL. Expired entries
    /// are removed and reported as absent.
    pub fn get(&mut self, cell: CellId, now_wall: i64) -> Option<f64> {
        let shard = self.shards.get(&cell).copied()?;
        if self.is_expired(&shard, now_wall) {
            self.shards.remove(&cell);
            return None;
        }
        self.shards.insert(
            cell,
            InfoShard {
                score: shard.score,
                touched_at: now_wall,
            },
        );
        Some(shard.score)
    }

    /// Hot lookup, then a synchronous point read of the durable store.
    ///
    /// A value found in the store is cached (not re-persisted). A store
    /// failure is logged and reported as absent.
    pub fn get_or_load(
        &mut self,
        cell: CellId,
        now_wall: i64,
        store: &dyn ShardStore,
    ) -> Option<f64> {
        if let Some(score) = self.get(cell, now_wall) {
            return Some(score);
        }
        match store.load_row(cell) {
            Ok(row) => {
                let score = row.and_then(|r| r.score)?;
                self.insert_hot(cell, score, now_wall);
                Some(score)
            }
            Err(e) => {
                tracing::warn!(error = %e, %cell, "Info shard read failed, treating as absent");
                None
            }
        }
    }

    /// Store a new score and persist it asynchronously.
    pub fn put(&mut self, cell: CellId, score: f64, now_wall: i64, store: &dyn ShardStore) {
        self.pending_loads.remove(&cell);
        self.insert_hot(cell, score, now_wall);
        store.save_score(cell, score);
    }

    fn insert_hot(&mut self, cell: CellId, score: f64, now_wall: i64) {
        self.shards.insert(
            cell,
            InfoShard {
                score,
                touched_at: now_wall,
            },
        );
    }

    /// Refresh the TTL of `cell` without reading it. Returns `false` if the
    /// cell is not hot.
    pub fn touch(&mut self, cell: CellId, now_wall: i64) -> bool {
        let ttl_ms = self.ttl_ms;
        match self.shards.get_mut(&cell) {
            Some(shard) if now_wall.saturating_sub(shard.touched_at) <= ttl_ms => {
                shard.touched_at = now_wall;
                true
            }
            _ => false,
        }
    }

    /// Queue an asynchronous load for a cold cell. Returns `true` if a new
    /// request was issued.
    pub fn request_load(&mut self, cell: CellId, store: &dyn ShardStore) -> bool {
        if self.shards.contains_key(&cell) || !self.pending_loads.insert(cell) {
            return false;
        }
        store.request_score(cell);
        true
    }

    /// Accept a completed load. Returns `true` if it was cached.
    ///
    /// Discarded when the cell was written while the load was in flight,
    /// is already hot, or was never scanned.
    pub fn accept_loaded(&mut self, loaded: LoadedScore, now_wall: i64) -> bool {
        if !self.pending_loads.remove(&loaded.cell) || self.shards.contains_key(&loaded.cell) {
            return false;
        }
        let Some(score) = loaded.score else {
            return false;
        };
        self.insert_hot(loaded.cell, score, now_wall);
        true
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn purge_expired(&mut self, now_wall: i64) -> usize {
        let ttl_ms = self.ttl_ms;
        let before = self.shards.len();
        self.shards
            .retain(|_, shard| now_wall.saturating_sub(shard.touched_at) <= ttl_ms);
        before.saturating_sub(self.shards.len())
    }

    /// Whether `cell` is hot (ignoring expiry).
    pub fn contains(&self, cell: CellId) -> bool {
        self.shards.contains_key(&cell)
    }

    /// Number of hot entries.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Number of asynchronous loads in flight.
    pub fn pending_loads(&self) -> usize {
        self.pending_loads.len()
    }
}
