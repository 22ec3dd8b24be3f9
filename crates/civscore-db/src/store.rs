//! The durable store interface consumed by the engine.
//!
//! Reads come in two flavours. [`ShardStore::load_row`] is a bounded
//! synchronous point read, used sparingly when a hot-cache miss must not
//! be mistaken for "never scanned". It observes every write queued before
//! it. [`ShardStore::request_score`] queues an
//! asynchronous load whose result is collected later through
//! [`ShardStore::drain_loaded`]. Writes are always fire-and-forget keyed
//! upserts, so duplicates are harmless.

use civscore_types::{CellId, PresenceRecord, ShardRow};

use crate::error::DbError;

/// Result of an asynchronous score load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadedScore {
    /// The cell that was requested.
    pub cell: CellId,
    /// The persisted score, or `None` if the cell was never scanned or the
    /// read failed.
    pub score: Option<f64>,
}

/// Durable key/value storage for shard rows, bound to one domain.
pub trait ShardStore: Send {
    /// Synchronously read the row for `cell`, including writes still
    /// queued at the time of the call.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the read fails.
    fn load_row(&self, cell: CellId) -> Result<Option<ShardRow>, DbError>;

    /// Persist an info score. Returns immediately.
    fn save_score(&self, cell: CellId, score: f64);

    /// Persist a batch of result-entry decay fields. Returns immediately.
    fn save_presence(&self, batch: Vec<(CellId, PresenceRecord)>);

    /// Queue an asynchronous load of the score for `cell`.
    fn request_score(&self, cell: CellId);

    /// Collect every asynchronous load that has completed so far.
    fn drain_loaded(&mut self) -> Vec<LoadedScore>;

    /// Read the persisted active-time clock, in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the read fails.
    fn load_active_time(&self) -> Result<Option<i64>, DbError>;

    /// Persist the active-time clock, in milliseconds. Returns immediately;
    /// the value is ordered with the writes queued around it.
    fn save_active_time(&self, active_ms: i64);

    /// Block until every write queued so far is durable.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the writer is gone.
    fn flush(&self) -> Result<(), DbError>;

    /// Flush, compact, and release the underlying storage.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the final flush fails.
    fn close(&mut self) -> Result<(), DbError>;
}
