//! Durable record layouts.
//!
//! One [`ShardRow`] exists per cell and domain. The score column belongs to
//! the info shard of that cell; the three timestamp columns belong to the
//! result entry centred on that cell. Either half may be missing: a row
//! written only by a presence flush has no score, and a row written only by
//! a scan has no presence fields.

use serde::{Deserialize, Serialize};

use crate::ids::CellId;

/// Decay bookkeeping of a result entry, as persisted.
///
/// `create_time` is wall-clock milliseconds. `presence_time` and
/// `last_recovery_time` are active-clock milliseconds, so process downtime
/// never counts as absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Wall-clock TTL baseline in milliseconds.
    pub create_time: i64,
    /// Active time of the last confirmed nearby presence.
    pub presence_time: i64,
    /// Active time of the last rate-limited recovery step.
    pub last_recovery_time: i64,
}

/// A single persisted shard row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShardRow {
    /// The cell this row describes.
    pub cell: CellId,
    /// Last computed info score, if the cell was ever scanned.
    pub score: Option<f64>,
    /// Wall-clock TTL baseline of the result entry.
    pub create_time: Option<i64>,
    /// Presence anchor of the result entry.
    pub presence_time: Option<i64>,
    /// Recovery rate-limit anchor of the result entry.
    pub last_recovery_time: Option<i64>,
}

impl ShardRow {
    /// Create an empty row for `cell`.
    pub const fn empty(cell: CellId) -> Self {
        Self {
            cell,
            score: None,
            create_time: None,
            presence_time: None,
            last_recovery_time: None,
        }
    }

    /// Return the persisted decay fields, if the presence half was written.
    ///
    /// A row with a presence time but no recovery time (written before the
    /// recovery column existed) recovers from its presence time.
    pub fn presence(&self) -> Option<PresenceRecord> {
        let presence_time = self.presence_time?;
        Some(PresenceRecord {
            create_time: self.create_time.unwrap_or(0),
            presence_time,
            last_recovery_time: self.last_recovery_time.unwrap_or(presence_time),
        })
    }
}
