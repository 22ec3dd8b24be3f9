//! In-process shard store.
//!
//! [`MemoryStore`] applies writes immediately and completes asynchronous
//! loads at request time, handing them out on the next
//! [`ShardStore::drain_loaded`]. Clones share state, so a test can keep a
//! handle while the engine owns another. Read failures can be injected to
//! exercise the "treat as absent" fallback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use civscore_types::{CellId, PresenceRecord, ShardRow};

use crate::error::DbError;
use crate::store::{LoadedScore, ShardStore};

#[derive(Debug, Default)]
struct Inner {
    rows: Mutex<HashMap<CellId, ShardRow>>,
    loaded: Mutex<Vec<LoadedScore>>,
    active_time: Mutex<Option<i64>>,
    fail_reads: AtomicBool,
    point_reads: AtomicUsize,
    closed: AtomicBool,
}

/// Shard store held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read fail (`true`) or succeed (`false`).
    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of synchronous point reads served so far.
    pub fn point_reads(&self) -> usize {
        self.inner.point_reads.load(Ordering::SeqCst)
    }

    /// Whether [`ShardStore::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Return a copy of the row for `cell`, bypassing failure injection.
    pub fn row(&self, cell: CellId) -> Option<ShardRow> {
        lock(&self.inner.rows).get(&cell).copied()
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        lock(&self.inner.rows).len()
    }

    /// Whether the store holds no rows.
    pub fn is_empty(&self) -> bool {
        lock(&self.inner.rows).is_empty()
    }

    fn read_failure(&self) -> Option<DbError> {
        self.inner
            .fail_reads
            .load(Ordering::SeqCst)
            .then(|| DbError::Config("injected read failure".to_owned()))
    }
}

impl ShardStore for MemoryStore {
    fn load_row(&self, cell: CellId) -> Result<Option<ShardRow>, DbError> {
        self.inner.point_reads.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.read_failure() {
            return Err(err);
        }
        Ok(self.row(cell))
    }

    fn save_score(&self, cell: CellId, score: f64) {
        lock(&self.inner.rows)
            .entry(cell)
            .or_insert_with(|| ShardRow::empty(cell))
            .score = Some(score);
    }

    fn save_presence(&self, batch: Vec<(CellId, PresenceRecord)>) {
        let mut rows = lock(&self.inner.rows);
        for (cell, record) in batch {
            let row = rows.entry(cell).or_insert_with(|| ShardRow::empty(cell));
            row.create_time = Some(record.create_time);
            row.presence_time = Some(record.presence_time);
            row.last_recovery_time = Some(record.last_recovery_time);
        }
    }

    fn request_score(&self, cell: CellId) {
        let score = if self.read_failure().is_some() {
            None
        } else {
            self.row(cell).and_then(|row| row.score)
        };
        lock(&self.inner.loaded).push(LoadedScore { cell, score });
    }

    fn drain_loaded(&mut self) -> Vec<LoadedScore> {
        std::mem::take(&mut *lock(&self.inner.loaded))
    }

    fn load_active_time(&self) -> Result<Option<i64>, DbError> {
        if let Some(err) = self.read_failure() {
            return Err(err);
        }
        Ok(*lock(&self.inner.active_time))
    }

    fn save_active_time(&self, active_ms: i64) {
        *lock(&self.inner.active_time) = Some(active_ms);
    }

    fn flush(&self) -> Result<(), DbError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), DbError> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn score_and_presence_share_a_row() {
        let store = MemoryStore::new();
        let cell = CellId::new(1, 2, 3);
        store.save_score(cell, 0.5);
        store.save_presence(vec![(
            cell,
            PresenceRecord {
                create_time: 10,
                presence_time: 20,
                last_recovery_time: 30,
            },
        )]);
        let row = store.load_row(cell).unwrap().unwrap();
        assert_eq!(row.score, Some(0.5));
        assert_eq!(row.presence_time, Some(20));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn injected_failures_surface_as_errors() {
        let store = MemoryStore::new();
        store.set_fail_reads(true);
        assert!(store.load_row(CellId::new(0, 0, 0)).is_err());
        assert!(store.load_active_time().is_err());
        assert_eq!(store.point_reads(), 1);
    }

    #[test]
    fn loads_are_delivered_once() {
        let mut store = MemoryStore::new();
        let cell = CellId::new(0, 1, 0);
        store.save_score(cell, 0.25);
        store.request_score(cell);
        let first = store.drain_loaded();
        assert_eq!(first, vec![LoadedScore { cell, score: Some(0.25) }]);
        assert!(store.drain_loaded().is_empty());
    }

    #[test]
    fn clones_share_state() {
        let store = MemoryStore::new();
        let mut handle = store.clone();
        handle.save_active_time(42);
        handle.close().unwrap();
        assert_eq!(store.load_active_time().unwrap(), Some(42));
        assert!(store.is_closed());
    }
}
