//! Background write-back worker.
//!
//! A single task drains the command channel, groups whatever is queued into
//! a batch of at most `batch_size` commands, and applies consecutive writes
//! as one transaction of keyed upserts. Point reads and flush requests are
//! served only after every write queued before them is committed, so a
//! caller always reads its own writes.

use std::sync::Arc;

use civscore_types::{CellId, PresenceRecord, ShardRow};
use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot};

use crate::schema::ACTIVE_TIME_KEY;
use crate::sqlite::fetch_row;

/// Reply channel of a point read.
pub(crate) type RowReply = oneshot::Sender<Result<Option<ShardRow>, sqlx::Error>>;

/// A command for the writer task.
#[derive(Debug)]
pub(crate) enum WriteCommand {
    /// Upsert the info score of a cell.
    Score { cell: CellId, score: f64 },
    /// Upsert the decay fields of a result entry.
    Presence {
        cell: CellId,
        record: PresenceRecord,
    },
    /// Upsert the persisted active-time clock.
    ActiveTime(i64),
    /// Read one row once all earlier commands are durable.
    Read { cell: CellId, reply: RowReply },
    /// Acknowledge once all earlier commands are durable.
    Flush(oneshot::Sender<()>),
}

const UPSERT_SCORE: &str = r"INSERT INTO shards (domain, cx, cz, sy, score)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT(domain, cx, cz, sy) DO UPDATE SET score = excluded.score";

const UPSERT_PRESENCE: &str = r"INSERT INTO shards (domain, cx, cz, sy, create_time, presence_time, last_recovery_time)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT(domain, cx, cz, sy) DO UPDATE SET
        create_time = excluded.create_time,
        presence_time = excluded.presence_time,
        last_recovery_time = excluded.last_recovery_time";

const UPSERT_META: &str = r"INSERT INTO store_meta (key, value) VALUES (?1, ?2)
    ON CONFLICT(key) DO UPDATE SET value = excluded.value";

/// Run the writer until every sender is dropped.
pub(crate) async fn run(
    pool: SqlitePool,
    domain: Arc<str>,
    mut rx: mpsc::UnboundedReceiver<WriteCommand>,
    batch_size: usize,
) {
    let batch_size = batch_size.max(1);
    let mut batch: Vec<WriteCommand> = Vec::with_capacity(batch_size);

    while let Some(first) = rx.recv().await {
        batch.push(first);
        while batch.len() < batch_size {
            match rx.try_recv() {
                Ok(cmd) => batch.push(cmd),
                Err(_empty_or_closed) => break,
            }
        }

        let mut writes = Vec::with_capacity(batch.len());
        for cmd in batch.drain(..) {
            match cmd {
                WriteCommand::Flush(ack) => {
                    commit(&pool, &domain, &mut writes).await;
                    // The flusher may have given up waiting.
                    let _ = ack.send(());
                }
                WriteCommand::Read { cell, reply } => {
                    commit(&pool, &domain, &mut writes).await;
                    let _ = reply.send(fetch_row(&pool, &domain, cell).await);
                }
                write => writes.push(write),
            }
        }
        commit(&pool, &domain, &mut writes).await;
    }

    tracing::debug!("Shard writer stopped");
}

/// Apply and clear the pending writes. A failed batch is logged and dropped.
async fn commit(pool: &SqlitePool, domain: &str, writes: &mut Vec<WriteCommand>) {
    if writes.is_empty() {
        return;
    }
    match write_batch(pool, domain, writes).await {
        Ok(()) => tracing::debug!(count = writes.len(), "Wrote shard batch"),
        Err(e) => tracing::warn!(
            error = %e,
            count = writes.len(),
            "Shard batch write failed, batch dropped"
        ),
    }
    writes.clear();
}

async fn write_batch(
    pool: &SqlitePool,
    domain: &str,
    writes: &[WriteCommand],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for write in writes {
        match write {
            WriteCommand::Score { cell, score } => {
                sqlx::query(UPSERT_SCORE)
                    .bind(domain)
                    .bind(cell.cx)
                    .bind(cell.cz)
                    .bind(cell.sy)
                    .bind(*score)
                    .execute(&mut *tx)
                    .await?;
            }
            WriteCommand::Presence { cell, record } => {
                sqlx::query(UPSERT_PRESENCE)
                    .bind(domain)
                    .bind(cell.cx)
                    .bind(cell.cz)
                    .bind(cell.sy)
                    .bind(record.create_time)
                    .bind(record.presence_time)
                    .bind(record.last_recovery_time)
                    .execute(&mut *tx)
                    .await?;
            }
            WriteCommand::ActiveTime(active_ms) => {
                sqlx::query(UPSERT_META)
                    .bind(ACTIVE_TIME_KEY)
                    .bind(*active_ms)
                    .execute(&mut *tx)
                    .await?;
            }
            WriteCommand::Read { .. } | WriteCommand::Flush(_) => {}
        }
    }
    tx.commit().await
}
