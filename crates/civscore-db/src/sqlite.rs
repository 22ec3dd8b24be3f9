//! `SQLite` shard store built on [`sqlx`].
//!
//! The store owns a small multi-threaded `tokio` runtime whose worker
//! threads form the bounded I/O pool. The simulation thread talks to it in
//! three ways:
//!
//! - writes are sent over an unbounded channel to the writer task and
//!   return immediately;
//! - asynchronous loads are spawned on the runtime, bounded by a semaphore,
//!   and deliver their results over a second channel;
//! - point reads are queued behind pending writes on the same channel and
//!   block the calling thread until the writer answers, so they see every
//!   earlier write. They must never be issued from inside another `tokio`
//!   runtime.
//!
//! Uses runtime query construction (not compile-time checked) so that no
//! database is needed at build time. All queries are parameterized.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use civscore_types::{CellId, PresenceRecord, ShardRow};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;

use crate::error::DbError;
use crate::schema::{self, ACTIVE_TIME_KEY};
use crate::store::{LoadedScore, ShardStore};
use crate::writer::{self, WriteCommand};

/// Default maximum number of pooled connections for on-disk databases.
const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// Default number of I/O worker threads.
const DEFAULT_IO_WORKERS: usize = 2;

/// Default number of commands per write transaction.
const DEFAULT_WRITE_BATCH_SIZE: usize = 256;

/// Default time to wait for the `SQLite` write lock.
const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 5;

/// Configuration for a [`SqliteStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `SQLite` connection URL, e.g. `sqlite://civscore.db` or `sqlite::memory:`.
    pub url: String,
    /// Domain (world or dimension) that every row is keyed under.
    pub domain: String,
    /// Maximum number of pooled connections (forced to 1 in memory).
    pub max_connections: u32,
    /// Number of I/O worker threads.
    pub io_workers: usize,
    /// Maximum number of commands per write transaction.
    pub write_batch_size: usize,
}

impl StoreConfig {
    /// Create a configuration for `url` and `domain` with default pool settings.
    pub fn new(url: &str, domain: &str) -> Self {
        Self {
            url: url.to_owned(),
            domain: domain.to_owned(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            io_workers: DEFAULT_IO_WORKERS,
            write_batch_size: DEFAULT_WRITE_BATCH_SIZE,
        }
    }

    /// Configuration for a private in-memory database.
    pub fn in_memory(domain: &str) -> Self {
        Self::new("sqlite::memory:", domain)
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the number of I/O worker threads.
    #[must_use]
    pub const fn with_io_workers(mut self, workers: usize) -> Self {
        self.io_workers = workers;
        self
    }

    /// Set the write batch size.
    #[must_use]
    pub const fn with_write_batch_size(mut self, size: usize) -> Self {
        self.write_batch_size = size;
        self
    }

    /// Whether the URL names an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// Open a connection pool for `config`.
///
/// An in-memory database lives only as long as its connection, so its pool
/// is pinned to a single connection that is never idled out or recycled.
///
/// # Errors
///
/// Returns [`DbError::Config`] if the URL cannot be parsed, or
/// [`DbError::Sqlite`] if the connection fails.
pub async fn connect(config: &StoreConfig) -> Result<SqlitePool, DbError> {
    let options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| DbError::Config(format!("Invalid database URL: {e}")))?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(DEFAULT_BUSY_TIMEOUT_SECS));

    let pool = if config.is_in_memory() {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(
                options
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal),
            )
            .await?
    };
    Ok(pool)
}

/// Durable shard store backed by `SQLite`.
pub struct SqliteStore {
    runtime: Runtime,
    pool: SqlitePool,
    domain: Arc<str>,
    writes: Option<mpsc::UnboundedSender<WriteCommand>>,
    writer: Option<JoinHandle<()>>,
    loaded_tx: mpsc::UnboundedSender<LoadedScore>,
    loaded_rx: mpsc::UnboundedReceiver<LoadedScore>,
    load_permits: Arc<Semaphore>,
}

impl SqliteStore {
    /// Open the store, run migrations and the repair pass, and start the
    /// writer task.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Runtime`] if the I/O runtime cannot be built, or
    /// any connection or migration error.
    pub fn open(config: &StoreConfig) -> Result<Self, DbError> {
        let workers = config.io_workers.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("civscore-io")
            .enable_all()
            .build()?;

        let pool = runtime.block_on(connect(config))?;
        runtime.block_on(schema::migrate(&pool))?;

        let domain: Arc<str> = Arc::from(config.domain.as_str());
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let writer = runtime.spawn(writer::run(
            pool.clone(),
            Arc::clone(&domain),
            write_rx,
            config.write_batch_size,
        ));
        let (loaded_tx, loaded_rx) = mpsc::unbounded_channel();

        tracing::info!(
            url = config.url.as_str(),
            domain = config.domain.as_str(),
            io_workers = workers,
            "Opened shard store"
        );

        Ok(Self {
            runtime,
            pool,
            domain,
            writes: Some(write_tx),
            writer: Some(writer),
            loaded_tx,
            loaded_rx,
            load_permits: Arc::new(Semaphore::new(workers)),
        })
    }

    /// Return the domain rows are keyed under.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Return the current schema version recorded in the database.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] if the query fails.
    pub fn schema_version(&self) -> Result<Option<i64>, DbError> {
        self.runtime.block_on(schema::current_version(&self.pool))
    }

    fn send(&self, cmd: WriteCommand) {
        let Some(writes) = &self.writes else {
            tracing::warn!("Shard store closed, write dropped");
            return;
        };
        if writes.send(cmd).is_err() {
            tracing::warn!("Shard writer stopped, write dropped");
        }
    }
}

impl ShardStore for SqliteStore {
    fn load_row(&self, cell: CellId) -> Result<Option<ShardRow>, DbError> {
        let writes = self.writes.as_ref().ok_or(DbError::WorkerGone)?;
        let (reply, answer) = oneshot::channel();
        writes
            .send(WriteCommand::Read { cell, reply })
            .map_err(|_closed| DbError::WorkerGone)?;
        let row = self
            .runtime
            .block_on(answer)
            .map_err(|_dropped| DbError::WorkerGone)??;
        Ok(row)
    }

    fn save_score(&self, cell: CellId, score: f64) {
        self.send(WriteCommand::Score { cell, score });
    }

    fn save_presence(&self, batch: Vec<(CellId, PresenceRecord)>) {
        for (cell, record) in batch {
            self.send(WriteCommand::Presence { cell, record });
        }
    }

    fn request_score(&self, cell: CellId) {
        let pool = self.pool.clone();
        let domain = Arc::clone(&self.domain);
        let loaded = self.loaded_tx.clone();
        let permits = Arc::clone(&self.load_permits);
        self.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let score = match fetch_row(&pool, &domain, cell).await {
                Ok(row) => row.and_then(|r| r.score),
                Err(e) => {
                    tracing::warn!(error = %e, %cell, "Async shard load failed");
                    None
                }
            };
            // The store may have been dropped while the load was in flight.
            let _ = loaded.send(LoadedScore { cell, score });
        });
    }

    fn drain_loaded(&mut self) -> Vec<LoadedScore> {
        let mut loaded = Vec::new();
        while let Ok(result) = self.loaded_rx.try_recv() {
            loaded.push(result);
        }
        loaded
    }

    fn load_active_time(&self) -> Result<Option<i64>, DbError> {
        let value = self.runtime.block_on(
            sqlx::query_scalar::<_, i64>("SELECT value FROM store_meta WHERE key = ?1")
                .bind(ACTIVE_TIME_KEY)
                .fetch_optional(&self.pool),
        )?;
        Ok(value)
    }

    fn save_active_time(&self, active_ms: i64) {
        self.send(WriteCommand::ActiveTime(active_ms));
    }

    fn flush(&self) -> Result<(), DbError> {
        let writes = self.writes.as_ref().ok_or(DbError::WorkerGone)?;
        let (ack_tx, ack_rx) = oneshot::channel();
        writes
            .send(WriteCommand::Flush(ack_tx))
            .map_err(|_closed| DbError::WorkerGone)?;
        self.runtime
            .block_on(ack_rx)
            .map_err(|_dropped| DbError::WorkerGone)
    }

    fn close(&mut self) -> Result<(), DbError> {
        if self.writes.is_none() {
            return Ok(());
        }
        let flushed = self.flush();

        // Dropping the last sender lets the writer drain and exit.
        self.writes = None;
        if let Some(writer) = self.writer.take() {
            if let Err(e) = self.runtime.block_on(writer) {
                tracing::warn!(error = %e, "Shard writer task failed");
            }
        }

        if let Err(e) = self.runtime.block_on(compact(&self.pool)) {
            tracing::warn!(error = %e, "Shard store compaction failed");
        }
        self.runtime.block_on(self.pool.close());
        tracing::info!(domain = &*self.domain, "Shard store closed");
        flushed
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Shard store close on drop failed");
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RawShardRow {
    cx: i32,
    cz: i32,
    sy: i32,
    score: Option<f64>,
    create_time: Option<i64>,
    presence_time: Option<i64>,
    last_recovery_time: Option<i64>,
}

impl From<RawShardRow> for ShardRow {
    fn from(raw: RawShardRow) -> Self {
        Self {
            cell: CellId::new(raw.cx, raw.cz, raw.sy),
            score: raw.score,
            create_time: raw.create_time,
            presence_time: raw.presence_time,
            last_recovery_time: raw.last_recovery_time,
        }
    }
}

pub(crate) async fn fetch_row(
    pool: &SqlitePool,
    domain: &str,
    cell: CellId,
) -> Result<Option<ShardRow>, sqlx::Error> {
    let raw = sqlx::query_as::<_, RawShardRow>(
        r"SELECT cx, cz, sy, score, create_time, presence_time, last_recovery_time
          FROM shards
          WHERE domain = ?1 AND cx = ?2 AND cz = ?3 AND sy = ?4",
    )
    .bind(domain)
    .bind(cell.cx)
    .bind(cell.cz)
    .bind(cell.sy)
    .fetch_optional(pool)
    .await?;
    Ok(raw.map(ShardRow::from))
}

/// Best-effort compaction on clean shutdown.
async fn compact(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("PRAGMA optimize").execute(pool).await?;
    sqlx::query("VACUUM").execute(pool).await?;
    Ok(())
}
