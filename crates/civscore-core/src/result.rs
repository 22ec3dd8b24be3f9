//! Result shards: pre-aggregated neighborhood scores around a query center.
//!
//! A [`ResultEntry`] holds the core and outer weighted sums of every info
//! score in its detection window, plus the presence fields that drive
//! absence decay. Entries are created lazily on first query, patched in
//! place by delta propagation, advanced by presence visits, rebuilt when
//! the aggregation tunables change, and evicted after their TTL.
//!
//! Only the presence fields are durable. They are staged in a write-back
//! buffer whenever they change, when an entry is first created, and when an
//! entry is evicted, and the buffer is flushed periodically.

use std::collections::HashMap;

use civscore_db::ShardStore;
use civscore_types::{CellId, PresenceRecord};

use crate::aggregate::{Aggregation, ConfigSignature, Sums};
use crate::clock::Now;
use crate::config::DecayConfig;
use crate::grid::{window, Offset};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// A cached neighborhood aggregate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultEntry {
    /// Weighted sum inside the core box. Never decays.
    pub core_sum: f64,
    /// Weighted sum outside the core box. Decays with absence.
    pub outer_sum: f64,
    /// Active time of the last confirmed nearby activity.
    pub presence_time: i64,
    /// Active time of the last recovery step.
    pub last_recovery_time: i64,
    /// Wall-clock creation time.
    pub create_time: i64,
    /// Tunables the sums were computed under.
    pub signature: ConfigSignature,
}

impl ResultEntry {
    /// Build an entry from freshly aggregated sums and existing presence
    /// fields.
    pub const fn new(sums: Sums, presence: PresenceRecord, signature: ConfigSignature) -> Self {
        Self {
            core_sum: sums.core,
            outer_sum: sums.outer,
            presence_time: presence.presence_time,
            last_recovery_time: presence.last_recovery_time,
            create_time: presence.create_time,
            signature,
        }
    }

    /// The durable presence fields.
    pub const fn presence(&self) -> PresenceRecord {
        PresenceRecord {
            create_time: self.create_time,
            presence_time: self.presence_time,
            last_recovery_time: self.last_recovery_time,
        }
    }

    /// Outer-sum multiplier after `now_active - presence_time` of absence.
    ///
    /// 1 within the grace period, then exponential decay bounded below by
    /// `min_decay_floor`.
    #[allow(clippy::cast_precision_loss)]
    pub fn decay_factor(&self, now_active: i64, decay: &DecayConfig) -> f64 {
        let hours_absent = now_active.saturating_sub(self.presence_time) as f64 / MS_PER_HOUR;
        if hours_absent <= decay.grace_period_hours {
            return 1.0;
        }
        let factor = (-decay.decay_lambda * (hours_absent - decay.grace_period_hours)).exp();
        factor.max(decay.min_decay_floor).min(1.0)
    }

    /// The entry's score in `[0, 1]` at `now_active`.
    pub fn effective_score(&self, now_active: i64, aggregation: &Aggregation, decay: &DecayConfig) -> f64 {
        let raw = self
            .outer_sum
            .mul_add(self.decay_factor(now_active, decay), self.core_sum);
        aggregation.normalize(raw)
    }

    /// Rate-limited recovery. Moves `presence_time` toward `now_active` by
    /// `min(gap, max(min_recovery_ms, gap * recovery_fraction))`, never past
    /// it. Returns `true` if the presence fields changed.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn on_presence_visit(&mut self, now_active: i64, decay: &DecayConfig) -> bool {
        if now_active.saturating_sub(self.last_recovery_time) < decay.recovery_cooldown_ms {
            return false;
        }
        self.last_recovery_time = now_active;
        let gap = now_active.saturating_sub(self.presence_time);
        if gap > 0 {
            let proportional = (gap as f64 * decay.recovery_fraction) as i64;
            let step = gap.min(decay.min_recovery_ms.max(proportional));
            self.presence_time = self.presence_time.saturating_add(step);
        }
        true
    }

    fn apply_delta(&mut self, aggregation: &Aggregation, offset: Offset, delta: f64) {
        let mut sums = Sums {
            core: self.core_sum,
            outer: self.outer_sum,
        };
        aggregation.accumulate(&mut sums, offset, delta);
        self.core_sum = sums.core;
        self.outer_sum = sums.outer;
    }
}

/// Outcome of a presence visit to one center.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// No live entry is cached there.
    Absent,
    /// TTL refreshed; recovery was rate limited.
    Refreshed,
    /// TTL refreshed and presence advanced.
    Recovered,
}

/// Lookup counters, reported by the engine's stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultStats {
    /// Valid hot hits.
    pub hits: u64,
    /// Hot entries rebuilt under new tunables.
    pub rebuilds: u64,
    /// Entries created from scratch or from persisted presence.
    pub misses: u64,
    /// Misses whose presence fields were recovered instead of reset.
    pub restored: u64,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    entry: ResultEntry,
    touched_at: i64,
}

/// TTL-refreshed hot map from query center to [`ResultEntry`].
#[derive(Debug)]
pub struct ResultShardCache {
    slots: HashMap<CellId, Slot>,
    dirty: HashMap<CellId, PresenceRecord>,
    ttl_ms: i64,
    stats: ResultStats,
}

impl ResultShardCache {
    /// Create an empty cache.
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            slots: HashMap::new(),
            dirty: HashMap::new(),
            ttl_ms,
            stats: ResultStats::default(),
        }
    }

    const fn is_live(&self, slot: &Slot, now_wall: i64) -> bool {
        now_wall.saturating_sub(slot.touched_at) <= self.ttl_ms
    }

    /// Return the entry for `center`, computing it if needed.
    ///
    /// A live entry with a matching signature is returned as is. A live
    /// entry with a stale signature gets fresh sums from `compute` but keeps
    /// its presence fields. Otherwise the entry is built from `compute`,
    /// taking presence fields from the write-back buffer or the store when
    /// they exist, or starting fresh and staging them for write-back.
    pub fn get_or_compute<F>(
        &mut self,
        center: CellId,
        now: Now,
        signature: ConfigSignature,
        store: &dyn ShardStore,
        compute: F,
    ) -> ResultEntry
    where
        F: FnOnce() -> Sums,
    {
        if let Some(slot) = self.slots.get(&center).copied() {
            if self.is_live(&slot, now.wall_ms) {
                let entry = if slot.entry.signature == signature {
                    self.stats.hits = self.stats.hits.saturating_add(1);
                    slot.entry
                } else {
                    self.stats.rebuilds = self.stats.rebuilds.saturating_add(1);
                    tracing::debug!(%center, "Rebuilding result entry under new tunables");
                    ResultEntry::new(compute(), slot.entry.presence(), signature)
                };
                self.slots.insert(
                    center,
                    Slot {
                        entry,
                        touched_at: now.wall_ms,
                    },
                );
                return entry;
            }
            self.evict(center);
        }

        self.stats.misses = self.stats.misses.saturating_add(1);
        let presence = match self.persisted_presence(center, store) {
            Some(presence) => {
                self.stats.restored = self.stats.restored.saturating_add(1);
                presence
            }
            None => {
                let fresh = PresenceRecord {
                    create_time: now.wall_ms,
                    presence_time: now.active_ms,
                    last_recovery_time: now.active_ms,
                };
                self.dirty.insert(center, fresh);
                fresh
            }
        };
        let entry = ResultEntry::new(compute(), presence, signature);
        self.slots.insert(
            center,
            Slot {
                entry,
                touched_at: now.wall_ms,
            },
        );
        entry
    }

    fn persisted_presence(&self, center: CellId, store: &dyn ShardStore) -> Option<PresenceRecord> {
        if let Some(staged) = self.dirty.get(&center) {
            return Some(*staged);
        }
        match store.load_row(center) {
            Ok(row) => row.and_then(|r| r.presence()),
            Err(e) => {
                tracing::warn!(error = %e, %center, "Presence read failed, starting fresh");
                None
            }
        }
    }

    /// Return the live entry for `center` without computing or touching it.
    pub fn get_if_present(&self, center: CellId, now_wall: i64) -> Option<ResultEntry> {
        self.slots
            .get(&center)
            .filter(|slot| self.is_live(slot, now_wall))
            .map(|slot| slot.entry)
    }

    /// Fan a change of `delta` in `changed`'s info score out to every live,
    /// signature-valid entry whose window covers it. Returns the number of
    /// entries patched.
    ///
    /// Deltas below `delta_epsilon` (and NaN) are ignored. Absent or stale
    /// entries are skipped; they pick up the new value when rebuilt.
    pub fn propagate_delta(
        &mut self,
        changed: CellId,
        delta: f64,
        aggregation: &Aggregation,
        now_wall: i64,
    ) -> usize {
        if !(delta.abs() >= aggregation.config().delta_epsilon) {
            return 0;
        }
        let ttl_ms = self.ttl_ms;
        let signature = aggregation.signature();
        let mut patched = 0_usize;
        for offset in window(aggregation.config().detection_radius) {
            // The entry at `center` sees `changed` at `offset`.
            let back = offset.reversed();
            let center = changed.offset(back.dx, back.dy, back.dz);
            let Some(slot) = self.slots.get_mut(&center) else {
                continue;
            };
            if now_wall.saturating_sub(slot.touched_at) > ttl_ms || slot.entry.signature != signature {
                continue;
            }
            slot.entry.apply_delta(aggregation, offset, delta);
            patched = patched.saturating_add(1);
        }
        patched
    }

    /// Presence visit to the live entry at `center`: refresh its TTL and run
    /// one rate-limited recovery step.
    pub fn visit(&mut self, center: CellId, now: Now, decay: &DecayConfig) -> Visit {
        let ttl_ms = self.ttl_ms;
        let Some(slot) = self.slots.get_mut(&center) else {
            return Visit::Absent;
        };
        if now.wall_ms.saturating_sub(slot.touched_at) > ttl_ms {
            return Visit::Absent;
        }
        slot.touched_at = now.wall_ms;
        if slot.entry.on_presence_visit(now.active_ms, decay) {
            self.dirty.insert(center, slot.entry.presence());
            Visit::Recovered
        } else {
            Visit::Refreshed
        }
    }

    fn evict(&mut self, center: CellId) {
        if let Some(slot) = self.slots.remove(&center) {
            self.dirty.insert(center, slot.entry.presence());
        }
    }

    /// Evict every expired entry, staging its presence fields. Returns the
    /// number evicted.
    pub fn purge_expired(&mut self, now_wall: i64) -> usize {
        let expired: Vec<CellId> = self
            .slots
            .iter()
            .filter(|(_, slot)| !self.is_live(slot, now_wall))
            .map(|(center, _)| *center)
            .collect();
        for center in &expired {
            self.evict(*center);
        }
        expired.len()
    }

    /// Hand every staged presence record to the store. Returns the number
    /// written.
    pub fn flush_presence(&mut self, store: &dyn ShardStore) -> usize {
        if self.dirty.is_empty() {
            return 0;
        }
        let mut batch: Vec<(CellId, PresenceRecord)> = self.dirty.drain().collect();
        batch.sort_unstable_by_key(|(cell, _)| *cell);
        let written = batch.len();
        store.save_presence(batch);
        written
    }

    /// Number of cached entries (ignoring expiry).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of presence records awaiting write-back.
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// Lookup counters since creation.
    pub const fn stats(&self) -> ResultStats {
        self.stats
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use civscore_db::MemoryStore;

    use super::*;
    use crate::config::AggregationConfig;

    const HOUR: i64 = 3_600_000;

    fn aggregation(detection_radius: i32, core_radius: i32) -> Aggregation {
        Aggregation::new(AggregationConfig {
            detection_radius,
            core_radius,
            ..AggregationConfig::default()
        })
    }

    fn now(active_ms: i64, wall_ms: i64) -> Now {
        Now { active_ms, wall_ms }
    }

    fn entry(core: f64, outer: f64, presence_time: i64) -> ResultEntry {
        ResultEntry::new(
            Sums { core, outer },
            PresenceRecord {
                create_time: 0,
                presence_time,
                last_recovery_time: presence_time,
            },
            aggregation(3, 1).signature(),
        )
    }

    // =========================================================================
    // Decay and recovery
    // =========================================================================

    #[test]
    fn no_decay_within_grace_period() {
        let decay = DecayConfig::default();
        let e = entry(0.0, 1.0, 0);
        assert!((e.decay_factor(2 * HOUR, &decay) - 1.0).abs() < f64::EPSILON);
        assert!(e.decay_factor(3 * HOUR, &decay) < 1.0);
    }

    #[test]
    fn decay_is_monotonic_and_floored() {
        let decay = DecayConfig::default();
        let agg = aggregation(3, 1);
        let e = entry(0.3, 1.2, 0);
        let mut previous = f64::INFINITY;
        for hours in 0..200 {
            let score = e.effective_score(hours * HOUR, &agg, &decay);
            assert!(score <= previous + 1e-12);
            assert!((0.0..=1.0).contains(&score));
            previous = score;
        }
        let far = e.decay_factor(10_000 * HOUR, &decay);
        assert!((far - decay.min_decay_floor).abs() < 1e-12);
        let floor_score = agg.normalize(1.2f64.mul_add(decay.min_decay_floor, 0.3));
        assert!((e.effective_score(10_000 * HOUR, &agg, &decay) - floor_score).abs() < 1e-12);
    }

    #[test]
    fn core_sum_never_decays() {
        let decay = DecayConfig::default();
        let agg = aggregation(3, 1);
        let e = entry(0.8, 0.0, 0);
        let fresh = e.effective_score(0, &agg, &decay);
        let stale = e.effective_score(1_000 * HOUR, &agg, &decay);
        assert!((fresh - stale).abs() < 1e-12);
    }

    #[test]
    fn empty_region_scores_exactly_zero() {
        let e = entry(0.0, 0.0, 0);
        assert!(e.effective_score(0, &aggregation(3, 1), &DecayConfig::default()).abs() < f64::EPSILON);
    }

    #[test]
    fn recovery_respects_cooldown() {
        let decay = DecayConfig::default();
        let mut e = entry(0.0, 1.0, 0);
        e.last_recovery_time = 10 * HOUR;
        assert!(!e.on_presence_visit(10 * HOUR + decay.recovery_cooldown_ms - 1, &decay));
        assert_eq!(e.presence_time, 0);
        assert!(e.on_presence_visit(10 * HOUR + decay.recovery_cooldown_ms, &decay));
        assert!(e.presence_time > 0);
    }

    #[test]
    fn recovery_advances_by_fraction_of_gap() {
        let decay = DecayConfig::default();
        let mut e = entry(0.0, 1.0, 0);
        let now = 10 * HOUR;
        assert!(e.on_presence_visit(now, &decay));
        assert_eq!(e.presence_time, HOUR);
        assert_eq!(e.last_recovery_time, now);
    }

    #[test]
    fn recovery_never_overshoots() {
        let decay = DecayConfig {
            recovery_cooldown_ms: 0,
            ..DecayConfig::default()
        };
        let mut e = entry(0.0, 1.0, 0);
        let now = 5 * HOUR;
        for _ in 0..10_000 {
            e.on_presence_visit(now, &decay);
            assert!(e.presence_time <= now);
        }
        assert_eq!(e.presence_time, now);

        // Gaps below the minimum step close in one visit.
        let mut small = entry(0.0, 1.0, now - 10);
        small.last_recovery_time = 0;
        assert!(small.on_presence_visit(now, &decay));
        assert_eq!(small.presence_time, now);
    }

    // =========================================================================
    // Cache behaviour
    // =========================================================================

    #[test]
    fn get_or_compute_is_idempotent() {
        let store = MemoryStore::new();
        let agg = aggregation(3, 1);
        let mut cache = ResultShardCache::new(1_000);
        let center = CellId::new(0, 0, 0);
        let sums = Sums { core: 0.4, outer: 0.9 };
        let first = cache.get_or_compute(center, now(0, 0), agg.signature(), &store, || sums);
        let second = cache.get_or_compute(center, now(10, 10), agg.signature(), &store, || {
            panic!("recomputed a valid entry")
        });
        assert_eq!(first, second);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn new_entries_stage_presence_for_write_back() {
        let store = MemoryStore::new();
        let agg = aggregation(3, 1);
        let mut cache = ResultShardCache::new(1_000);
        let center = CellId::new(1, 2, 3);
        let _ = cache.get_or_compute(center, now(500, 9_000), agg.signature(), &store, Sums::default);
        assert_eq!(cache.dirty_len(), 1);
        assert_eq!(cache.flush_presence(&store), 1);
        assert_eq!(cache.dirty_len(), 0);

        let row = store.row(center).unwrap();
        assert_eq!(row.presence_time, Some(500));
        assert_eq!(row.last_recovery_time, Some(500));
        assert_eq!(row.create_time, Some(9_000));
        assert_eq!(row.score, None);
    }

    #[test]
    fn stale_signature_rebuilds_sums_but_keeps_presence() {
        let store = MemoryStore::new();
        let old = aggregation(3, 1);
        let new = aggregation(2, 0);
        let mut cache = ResultShardCache::new(1_000);
        let center = CellId::new(0, 0, 0);

        let first = cache.get_or_compute(center, now(100, 0), old.signature(), &store, || Sums {
            core: 1.0,
            outer: 1.0,
        });
        let rebuilt = cache.get_or_compute(center, now(5_000, 10), new.signature(), &store, || Sums {
            core: 0.5,
            outer: 0.25,
        });
        assert_eq!(rebuilt.signature, new.signature());
        assert!((rebuilt.core_sum - 0.5).abs() < f64::EPSILON);
        assert_eq!(rebuilt.presence_time, first.presence_time);
        assert_eq!(rebuilt.create_time, first.create_time);
        assert_eq!(cache.stats().rebuilds, 1);
    }

    #[test]
    fn expired_entries_are_absent_and_presence_survives() {
        let store = MemoryStore::new();
        let agg = aggregation(3, 1);
        let decay = DecayConfig::default();
        let mut cache = ResultShardCache::new(1_000);
        let center = CellId::new(0, 0, 0);
        let _ = cache.get_or_compute(center, now(0, 0), agg.signature(), &store, Sums::default);
        let _ = cache.flush_presence(&store);
        let mut staged = cache.get_if_present(center, 0).unwrap();
        assert!(staged.on_presence_visit(10 * HOUR, &decay));
        assert_eq!(cache.visit(center, now(10 * HOUR, 500), &decay), Visit::Recovered);

        assert!(cache.get_if_present(center, 1_501).is_none());
        assert_eq!(cache.visit(center, now(10 * HOUR, 1_501), &decay), Visit::Absent);
        assert_eq!(cache.purge_expired(1_501), 1);
        assert!(cache.is_empty());
        let _ = cache.flush_presence(&store);

        let row = store.row(center).unwrap();
        assert_eq!(row.presence_time, Some(staged.presence_time));

        // A cold rebuild resumes from the persisted presence.
        let restored = cache.get_or_compute(center, now(11 * HOUR, 2_000), agg.signature(), &store, Sums::default);
        assert_eq!(restored.presence_time, staged.presence_time);
        assert_eq!(cache.stats().restored, 1);
        assert_eq!(cache.dirty_len(), 0);
    }

    #[test]
    fn presence_read_failure_starts_fresh() {
        let store = MemoryStore::new();
        let center = CellId::new(0, 0, 0);
        store.save_presence(vec![(
            center,
            PresenceRecord {
                create_time: 0,
                presence_time: 7,
                last_recovery_time: 7,
            },
        )]);
        store.set_fail_reads(true);
        let mut cache = ResultShardCache::new(1_000);
        let e = cache.get_or_compute(center, now(900, 0), aggregation(3, 1).signature(), &store, Sums::default);
        assert_eq!(e.presence_time, 900);
    }

    #[test]
    fn delta_example_at_distance_two() {
        let store = MemoryStore::new();
        let agg = aggregation(3, 1);
        let mut cache = ResultShardCache::new(1_000);
        let center = CellId::new(0, 0, 0);
        let _ = cache.get_or_compute(center, now(0, 0), agg.signature(), &store, Sums::default);

        let changed = CellId::new(2, 0, 0);
        assert!(cache.propagate_delta(changed, 0.6 - 0.2, &agg, 0) >= 1);
        let e = cache.get_if_present(center, 0).unwrap();
        assert!((e.outer_sum - 0.4 / 3.0).abs() < 1e-9);
        assert!(e.core_sum.abs() < 1e-12);
    }

    #[test]
    fn delta_is_invertible() {
        let store = MemoryStore::new();
        let agg = aggregation(3, 1);
        let mut cache = ResultShardCache::new(1_000);
        let centers: Vec<CellId> = (-4..=4).map(|x| CellId::new(x, 1, 0)).collect();
        for (i, center) in centers.iter().enumerate() {
            let seed = f64::from(u32::try_from(i).unwrap());
            let _ = cache.get_or_compute(*center, now(0, 0), agg.signature(), &store, || Sums {
                core: seed * 0.1,
                outer: seed * 0.37,
            });
        }
        let before: Vec<ResultEntry> = centers.iter().map(|c| cache.get_if_present(*c, 0).unwrap()).collect();

        let changed = CellId::new(0, 0, 0);
        let patched = cache.propagate_delta(changed, 0.731, &agg, 0);
        assert_eq!(patched, 7);
        assert_eq!(cache.propagate_delta(changed, -0.731, &agg, 0), patched);

        for (center, old) in centers.iter().zip(&before) {
            let e = cache.get_if_present(*center, 0).unwrap();
            assert!((e.core_sum - old.core_sum).abs() < 1e-12);
            assert!((e.outer_sum - old.outer_sum).abs() < 1e-12);
        }
    }

    #[test]
    fn tiny_stale_and_absent_targets_are_skipped() {
        let store = MemoryStore::new();
        let agg = aggregation(3, 1);
        let old = aggregation(2, 1);
        let mut cache = ResultShardCache::new(1_000);
        let _ = cache.get_or_compute(CellId::new(0, 0, 0), now(0, 0), old.signature(), &store, Sums::default);

        assert_eq!(cache.propagate_delta(CellId::new(1, 0, 0), 1e-9, &agg, 0), 0);
        assert_eq!(cache.propagate_delta(CellId::new(1, 0, 0), f64::NAN, &agg, 0), 0);
        assert_eq!(cache.propagate_delta(CellId::new(1, 0, 0), 0.5, &agg, 0), 0);
        assert_eq!(cache.propagate_delta(CellId::new(1, 0, 0), 0.5, &old, 2_000), 0);
    }
}
