//! Presence sweep.
//!
//! Runs at a fixed interval over the positions of every active agent.
//! When an agent has moved to a new cell, every info shard within the touch
//! radius (detection radius plus interaction range) has its TTL refreshed,
//! and cold cells get an asynchronous load. On every sweep, moved or not,
//! each cached result entry within the influence radius is visited, which
//! refreshes its TTL and advances its presence time. Visits are the only
//! thing that holds off outer-sum decay in inhabited areas.

use std::collections::{HashMap, HashSet};

use civscore_db::ShardStore;
use civscore_types::{AgentKey, CellId, WorldPos};

use crate::clock::Now;
use crate::config::{DecayConfig, PresenceConfig};
use crate::grid::{window, GridIndex};
use crate::info::InfoShardCache;
use crate::result::{ResultShardCache, Visit};

/// One active agent, as sampled by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveAgent {
    /// Stable identity across sweeps.
    pub key: AgentKey,
    /// Current position.
    pub pos: WorldPos,
}

impl ActiveAgent {
    /// Create an agent sample.
    pub const fn new(key: AgentKey, pos: WorldPos) -> Self {
        Self { key, pos }
    }
}

/// Counters from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Agents sampled.
    pub agents: usize,
    /// Agents whose cell changed since the previous sweep.
    pub moved: usize,
    /// Info shards whose TTL was refreshed.
    pub touched: usize,
    /// Asynchronous loads issued for cold cells.
    pub load_requests: usize,
    /// Result entries visited.
    pub visited: usize,
    /// Result entries whose presence advanced.
    pub recovered: usize,
}

/// Caches and tunables a sweep operates on.
pub struct SweepTargets<'a> {
    /// Info score cache.
    pub info: &'a mut InfoShardCache,
    /// Result entry cache.
    pub results: &'a mut ResultShardCache,
    /// Durable store, for cold loads.
    pub store: &'a dyn ShardStore,
    /// World bounds.
    pub grid: &'a GridIndex,
    /// Current detection radius.
    pub detection_radius: i32,
    /// Recovery tunables.
    pub decay: &'a DecayConfig,
}

/// Remembers each agent's last cell so info touches only follow movement.
#[derive(Debug)]
pub struct PresenceScheduler {
    config: PresenceConfig,
    last_cells: HashMap<AgentKey, CellId>,
}

impl PresenceScheduler {
    /// Create a scheduler with no known agents.
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            config,
            last_cells: HashMap::new(),
        }
    }

    /// Run one sweep over `agents`. Agents absent from the sample are
    /// forgotten, so they count as moved when they reappear.
    pub fn sweep(&mut self, agents: &[ActiveAgent], targets: &mut SweepTargets<'_>, now: Now) -> SweepReport {
        let mut report = SweepReport {
            agents: agents.len(),
            ..SweepReport::default()
        };
        let touch_radius = targets
            .detection_radius
            .saturating_add(self.config.interaction_range);

        let mut seen = HashSet::with_capacity(agents.len());
        for agent in agents {
            let cell = GridIndex::cell_of(agent.pos);
            seen.insert(agent.key);
            if self.last_cells.insert(agent.key, cell) != Some(cell) {
                report.moved = report.moved.saturating_add(1);
                touch_info(cell, touch_radius, targets, now.wall_ms, &mut report);
            }
            for offset in window(self.config.influence_radius) {
                let center = cell.offset(offset.dx, offset.dy, offset.dz);
                match targets.results.visit(center, now, targets.decay) {
                    Visit::Absent => {}
                    Visit::Refreshed => report.visited = report.visited.saturating_add(1),
                    Visit::Recovered => {
                        report.visited = report.visited.saturating_add(1);
                        report.recovered = report.recovered.saturating_add(1);
                    }
                }
            }
        }
        self.last_cells.retain(|key, _| seen.contains(key));

        tracing::debug!(
            agents = report.agents,
            moved = report.moved,
            touched = report.touched,
            load_requests = report.load_requests,
            visited = report.visited,
            recovered = report.recovered,
            "Presence sweep complete"
        );
        report
    }

    /// Number of agents remembered from the last sweep.
    pub fn tracked_agents(&self) -> usize {
        self.last_cells.len()
    }
}

fn touch_info(
    cell: CellId,
    radius: i32,
    targets: &mut SweepTargets<'_>,
    now_wall: i64,
    report: &mut SweepReport,
) {
    for offset in window(radius) {
        let target = cell.offset(offset.dx, offset.dy, offset.dz);
        if !targets.grid.contains(target) {
            continue;
        }
        if targets.info.touch(target, now_wall) {
            report.touched = report.touched.saturating_add(1);
        } else if targets.info.request_load(target, targets.store) {
            report.load_requests = report.load_requests.saturating_add(1);
        }
    }
}

/// A fixed-interval timer over some millisecond time source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    interval_ms: i64,
    last_ms: Option<i64>,
}

impl Schedule {
    /// A schedule that is due immediately, then every `interval_ms`.
    pub const fn every(interval_ms: i64) -> Self {
        Self {
            interval_ms,
            last_ms: None,
        }
    }

    /// Whether the interval has elapsed since the last [`Self::mark`].
    pub fn is_due(&self, now_ms: i64) -> bool {
        self.last_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= self.interval_ms)
    }

    /// Record a run at `now_ms`.
    pub const fn mark(&mut self, now_ms: i64) {
        self.last_ms = Some(now_ms);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use civscore_db::MemoryStore;

    use super::*;
    use crate::aggregate::{Aggregation, Sums};
    use crate::config::{AggregationConfig, GridConfig};

    struct Fixture {
        info: InfoShardCache,
        results: ResultShardCache,
        store: MemoryStore,
        grid: GridIndex,
        decay: DecayConfig,
        aggregation: Aggregation,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                info: InfoShardCache::new(10_000),
                results: ResultShardCache::new(10_000),
                store: MemoryStore::new(),
                grid: GridIndex::new(&GridConfig::default()),
                decay: DecayConfig {
                    recovery_cooldown_ms: 0,
                    ..DecayConfig::default()
                },
                aggregation: Aggregation::new(AggregationConfig {
                    detection_radius: 1,
                    core_radius: 0,
                    ..AggregationConfig::default()
                }),
            }
        }

        fn sweep(&mut self, scheduler: &mut PresenceScheduler, agents: &[ActiveAgent], now: Now) -> SweepReport {
            let mut targets = SweepTargets {
                info: &mut self.info,
                results: &mut self.results,
                store: &self.store,
                grid: &self.grid,
                detection_radius: self.aggregation.config().detection_radius,
                decay: &self.decay,
            };
            scheduler.sweep(agents, &mut targets, now)
        }
    }

    fn scheduler() -> PresenceScheduler {
        PresenceScheduler::new(PresenceConfig {
            sweep_interval_ms: 1_000,
            interaction_range: 0,
            influence_radius: 0,
        })
    }

    fn agent(key: u64, x: f64) -> ActiveAgent {
        ActiveAgent::new(AgentKey(key), WorldPos::new(x, 8.0, 8.0))
    }

    fn at(active_ms: i64) -> Now {
        Now {
            active_ms,
            wall_ms: 0,
        }
    }

    #[test]
    fn info_touches_only_follow_movement() {
        let mut fx = Fixture::new();
        let mut scheduler = scheduler();
        let first = fx.sweep(&mut scheduler, &[agent(1, 8.0)], at(0));
        assert_eq!(first.moved, 1);
        // 3 x 3 x 3 window, all cold and never scanned.
        assert_eq!(first.load_requests, 27);
        assert_eq!(first.touched, 0);

        // Stationary: no info work at all.
        let still = fx.sweep(&mut scheduler, &[agent(1, 9.0)], at(10));
        assert_eq!(still.moved, 0);
        assert_eq!(still.load_requests + still.touched, 0);

        // Warm one cell, then move one cell over.
        fx.info.put(CellId::new(1, 0, 0), 0.5, 0, &fx.store);
        let moved = fx.sweep(&mut scheduler, &[agent(1, 24.0)], at(20));
        assert_eq!(moved.moved, 1);
        assert_eq!(moved.touched, 1);
    }

    #[test]
    fn stationary_agents_still_advance_presence() {
        let mut fx = Fixture::new();
        let mut scheduler = scheduler();
        let center = CellId::new(0, 0, 0);
        let signature = fx.aggregation.signature();
        let _ = fx.results.get_or_compute(center, at(0), signature, &fx.store, Sums::default);

        let hour = 3_600_000;
        let _ = fx.sweep(&mut scheduler, &[agent(1, 8.0)], at(10 * hour));
        let after_first = fx.results.get_if_present(center, 0).unwrap().presence_time;
        assert_eq!(after_first, hour);

        let report = fx.sweep(&mut scheduler, &[agent(1, 8.0)], at(10 * hour));
        assert_eq!(report.moved, 0);
        assert_eq!(report.recovered, 1);
        let after_second = fx.results.get_if_present(center, 0).unwrap().presence_time;
        assert!(after_second > after_first);
        assert!(after_second <= 10 * hour);
    }

    #[test]
    fn departed_agents_are_forgotten() {
        let mut fx = Fixture::new();
        let mut scheduler = scheduler();
        let _ = fx.sweep(&mut scheduler, &[agent(1, 8.0), agent(2, 40.0)], at(0));
        assert_eq!(scheduler.tracked_agents(), 2);
        let _ = fx.sweep(&mut scheduler, &[agent(2, 40.0)], at(10));
        assert_eq!(scheduler.tracked_agents(), 1);
        let back = fx.sweep(&mut scheduler, &[agent(1, 8.0), agent(2, 40.0)], at(20));
        assert_eq!(back.moved, 1);
    }

    #[test]
    fn schedule_fires_on_interval() {
        let mut schedule = Schedule::every(1_000);
        assert!(schedule.is_due(0));
        schedule.mark(0);
        assert!(!schedule.is_due(999));
        assert!(schedule.is_due(1_000));
        schedule.mark(1_000);
        assert!(!schedule.is_due(1_500));
    }
}
