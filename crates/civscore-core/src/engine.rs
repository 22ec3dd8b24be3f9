//! The scoring engine facade.
//!
//! [`CivEngine`] owns every cache, the clock and the durable store, and is
//! driven from a single simulation thread:
//!
//! - [`CivEngine::score_at`] answers queries.
//! - [`CivEngine::on_cell_content_changed`] reacts to world mutations.
//! - [`CivEngine::tick`] runs once per simulation step.
//! - [`CivEngine::maintain`] runs the interval jobs (presence sweep,
//!   cleanup, write-back flush) whenever they are due.
//! - [`CivEngine::shutdown`] applies pending cascades, persists everything
//!   and closes the store.

use std::collections::BTreeSet;

use civscore_db::ShardStore;
use civscore_types::{BlockPos, CellId, WorldPos};

use crate::aggregate::Aggregation;
use crate::clock::{Clock, Now};
use crate::config::{AggregationConfig, CivConfig};
use crate::error::EngineError;
use crate::grid::GridIndex;
use crate::info::{InfoShardCache, InfoShardComputer};
use crate::presence::{ActiveAgent, PresenceScheduler, Schedule, SweepReport, SweepTargets};
use crate::propagate::{CellChange, DeltaPropagator};
use crate::result::{ResultEntry, ResultShardCache, ResultStats};
use crate::world::{MutationOrigin, WorldView};

/// Counters from one simulation step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Active time after the step.
    pub active_ms: i64,
    /// Completed asynchronous loads written into the info cache.
    pub loads_accepted: usize,
    /// Completed loads dropped because they were no longer needed.
    pub loads_discarded: usize,
    /// Deferred cascade mutations processed.
    pub cascades: usize,
}

/// Counters from one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Info shards evicted.
    pub info_evicted: usize,
    /// Result entries evicted.
    pub results_evicted: usize,
}

/// Which interval jobs ran during [`CivEngine::maintain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Presence sweep, if it was due.
    pub sweep: Option<SweepReport>,
    /// Cleanup, if it was due.
    pub cleanup: Option<CleanupReport>,
    /// Presence records flushed, if the flush was due.
    pub flushed: Option<usize>,
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Current active time.
    pub active_ms: i64,
    /// Hot info shards.
    pub info_entries: usize,
    /// Asynchronous loads in flight.
    pub pending_loads: usize,
    /// Cached result entries.
    pub result_entries: usize,
    /// Presence records awaiting write-back.
    pub dirty_presence: usize,
    /// Cascade mutations awaiting the next tick.
    pub pending_cascades: usize,
    /// Agents remembered by the presence scheduler.
    pub tracked_agents: usize,
    /// Result cache lookup counters.
    pub results: ResultStats,
    /// Mutations applied, primary and cascade.
    pub mutations: u64,
}

/// Incremental civilization scoring over a voxel world.
pub struct CivEngine {
    config: CivConfig,
    grid: GridIndex,
    aggregation: Aggregation,
    computer: InfoShardComputer,
    info: InfoShardCache,
    results: ResultShardCache,
    presence: PresenceScheduler,
    clock: Box<dyn Clock>,
    store: Box<dyn ShardStore>,
    cascades: BTreeSet<CellId>,
    sweep_schedule: Schedule,
    cleanup_schedule: Schedule,
    flush_schedule: Schedule,
    mutations: u64,
}

impl CivEngine {
    /// Validate `config`, restore the active-time clock from `store`, and
    /// build empty caches.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] for invalid configuration or
    /// [`EngineError::Store`] if the persisted clock cannot be read.
    pub fn open(
        config: CivConfig,
        mut clock: Box<dyn Clock>,
        store: Box<dyn ShardStore>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        if let Some(active_ms) = store.load_active_time()? {
            clock.restore(active_ms);
        }
        tracing::info!(
            active_ms = clock.active_ms(),
            detection_radius = config.aggregation.detection_radius,
            core_radius = config.aggregation.core_radius,
            "Civilization engine opened"
        );

        Ok(Self {
            grid: GridIndex::new(&config.grid),
            aggregation: Aggregation::new(config.aggregation.clone()),
            computer: InfoShardComputer::new(&config.grid, &config.scoring),
            info: InfoShardCache::new(config.cache.info_ttl_ms),
            results: ResultShardCache::new(config.cache.result_ttl_ms),
            presence: PresenceScheduler::new(config.presence.clone()),
            sweep_schedule: Schedule::every(config.presence.sweep_interval_ms),
            cleanup_schedule: Schedule::every(config.storage.cleanup_interval_ms),
            flush_schedule: Schedule::every(config.storage.flush_interval_ms),
            clock,
            store,
            cascades: BTreeSet::new(),
            mutations: 0,
            config,
        })
    }

    /// Civilization score in `[0, 1]` at `pos`.
    pub fn score_at(&mut self, world: &dyn WorldView, pos: WorldPos) -> f64 {
        self.score_cell(world, GridIndex::cell_of(pos))
    }

    /// Civilization score in `[0, 1]` of the neighborhood centered on `cell`.
    pub fn score_cell(&mut self, world: &dyn WorldView, cell: CellId) -> f64 {
        let now = self.now();
        let entry = self.entry_at(world, cell, now);
        entry.effective_score(now.active_ms, &self.aggregation, &self.config.decay)
    }

    /// The result entry centered on `cell`, computing it if needed.
    pub fn result_entry(&mut self, world: &dyn WorldView, cell: CellId) -> ResultEntry {
        let now = self.now();
        self.entry_at(world, cell, now)
    }

    fn entry_at(&mut self, world: &dyn WorldView, center: CellId, now: Now) -> ResultEntry {
        let store: &dyn ShardStore = self.store.as_ref();
        let info = &mut self.info;
        let computer = &self.computer;
        let aggregation = &self.aggregation;
        let grid = &self.grid;
        self.results
            .get_or_compute(center, now, aggregation.signature(), store, || {
                aggregation.aggregate(center, grid, |cell| {
                    info.get_or_load(cell, now.wall_ms, store).unwrap_or_else(|| {
                        let score = computer.compute(world, cell);
                        info.put(cell, score, now.wall_ms, store);
                        score
                    })
                })
            })
    }

    /// React to a content change at `pos`.
    ///
    /// Primary changes are applied before returning. Cascade changes are
    /// coalesced per cell and applied by the next [`Self::tick`]; `None` is
    /// returned for them.
    pub fn on_cell_content_changed(
        &mut self,
        world: &dyn WorldView,
        pos: BlockPos,
        origin: MutationOrigin,
    ) -> Option<CellChange> {
        let cell = pos.cell();
        match origin {
            MutationOrigin::Primary => Some(self.apply_change(world, cell)),
            MutationOrigin::Cascade => {
                self.cascades.insert(cell);
                None
            }
        }
    }

    fn apply_change(&mut self, world: &dyn WorldView, cell: CellId) -> CellChange {
        let now_wall = self.clock.wall_ms();
        self.mutations = self.mutations.saturating_add(1);
        DeltaPropagator {
            computer: &self.computer,
            info: &mut self.info,
            results: &mut self.results,
            store: self.store.as_ref(),
            aggregation: &self.aggregation,
        }
        .on_cell_content_changed(world, cell, now_wall)
    }

    /// Per-step maintenance: advance the clock, accept completed loads and
    /// apply deferred cascade changes.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Clock`] if active time would overflow.
    pub fn tick(&mut self, world: &dyn WorldView) -> Result<TickReport, EngineError> {
        let active_ms = self.clock.tick()?;
        let now_wall = self.clock.wall_ms();
        let mut report = TickReport {
            active_ms,
            ..TickReport::default()
        };

        for loaded in self.store.drain_loaded() {
            if self.info.accept_loaded(loaded, now_wall) {
                report.loads_accepted = report.loads_accepted.saturating_add(1);
            } else {
                report.loads_discarded = report.loads_discarded.saturating_add(1);
            }
        }

        report.cascades = self.apply_cascades(world);
        Ok(report)
    }

    fn apply_cascades(&mut self, world: &dyn WorldView) -> usize {
        let cascades = std::mem::take(&mut self.cascades);
        let applied = cascades.len();
        for cell in cascades {
            let _ = self.apply_change(world, cell);
        }
        if applied > 0 {
            tracing::debug!(cascades = applied, "Applied deferred cascade changes");
        }
        applied
    }

    /// Run one presence sweep over `agents` now, regardless of schedule.
    pub fn presence_sweep(&mut self, agents: &[ActiveAgent]) -> SweepReport {
        let now = self.now();
        let mut targets = SweepTargets {
            info: &mut self.info,
            results: &mut self.results,
            store: self.store.as_ref(),
            grid: &self.grid,
            detection_radius: self.aggregation.config().detection_radius,
            decay: &self.config.decay,
        };
        let report = self.presence.sweep(agents, &mut targets, now);
        self.sweep_schedule.mark(now.active_ms);
        report
    }

    /// Hand every staged presence record and the clock to the store's
    /// write queue. Returns the number of records queued.
    pub fn flush_presence(&mut self) -> usize {
        let flushed = self.results.flush_presence(self.store.as_ref());
        self.store.save_active_time(self.clock.active_ms());
        self.flush_schedule.mark(self.clock.wall_ms());
        if flushed > 0 {
            tracing::debug!(flushed, "Flushed presence write-back buffer");
        }
        flushed
    }

    /// Evict expired entries from both caches. Evicted result entries have
    /// their presence fields staged for the next flush.
    pub fn cleanup_expired(&mut self) -> CleanupReport {
        let now_wall = self.clock.wall_ms();
        let report = CleanupReport {
            info_evicted: self.info.purge_expired(now_wall),
            results_evicted: self.results.purge_expired(now_wall),
        };
        self.cleanup_schedule.mark(now_wall);
        if report.info_evicted > 0 || report.results_evicted > 0 {
            tracing::debug!(
                info_evicted = report.info_evicted,
                results_evicted = report.results_evicted,
                "Evicted expired cache entries"
            );
        }
        report
    }

    /// Run whichever interval jobs are due. Sweeps are timed in active
    /// time; cleanup and flush in wall time.
    pub fn maintain(&mut self, agents: &[ActiveAgent]) -> MaintenanceReport {
        let now = self.now();
        let mut report = MaintenanceReport::default();
        if self.sweep_schedule.is_due(now.active_ms) {
            report.sweep = Some(self.presence_sweep(agents));
        }
        if self.cleanup_schedule.is_due(now.wall_ms) {
            report.cleanup = Some(self.cleanup_expired());
        }
        if self.flush_schedule.is_due(now.wall_ms) {
            report.flushed = Some(self.flush_presence());
        }
        report
    }

    /// Replace the aggregation tunables. Cached entries computed under the
    /// old radii become stale and are rebuilt on their next query with
    /// their presence history intact.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if `aggregation` is invalid.
    pub fn retune(&mut self, aggregation: AggregationConfig) -> Result<(), EngineError> {
        aggregation.validate()?;
        tracing::info!(
            detection_radius = aggregation.detection_radius,
            core_radius = aggregation.core_radius,
            distance_alpha = aggregation.distance_alpha,
            "Aggregation retuned"
        );
        self.aggregation = Aggregation::new(aggregation.clone());
        self.config.aggregation = aggregation;
        Ok(())
    }

    /// Apply pending cascade changes against `world`, flush all dirty
    /// state, persist the clock and close the store.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the final flush or close fails.
    pub fn shutdown(mut self, world: &dyn WorldView) -> Result<(), EngineError> {
        let cascades = self.apply_cascades(world);
        let flushed = self.results.flush_presence(self.store.as_ref());
        let active_ms = self.clock.active_ms();
        self.store.save_active_time(active_ms);
        self.store.close()?;
        tracing::info!(cascades, flushed, active_ms, "Civilization engine shut down");
        Ok(())
    }

    /// Current statistics.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            active_ms: self.clock.active_ms(),
            info_entries: self.info.len(),
            pending_loads: self.info.pending_loads(),
            result_entries: self.results.len(),
            dirty_presence: self.results.dirty_len(),
            pending_cascades: self.cascades.len(),
            tracked_agents: self.presence.tracked_agents(),
            results: self.results.stats(),
            mutations: self.mutations,
        }
    }

    /// Sample the clock.
    pub fn now(&self) -> Now {
        Now::of(self.clock.as_ref())
    }

    /// The active configuration.
    pub const fn config(&self) -> &CivConfig {
        &self.config
    }

    /// The current aggregation tunables.
    pub const fn aggregation(&self) -> &Aggregation {
        &self.aggregation
    }

    /// The durable store.
    pub fn store(&self) -> &dyn ShardStore {
        self.store.as_ref()
    }
}
