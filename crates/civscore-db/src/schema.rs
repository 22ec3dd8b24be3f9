//! Versioned schema for the shard store.
//!
//! Migrations are applied in order, each inside its own transaction, and
//! the recorded version only moves forward when a migration commits. A
//! failing migration rolls back and leaves the prior schema intact.
//!
//! After migrating, [`repair`] introspects the live schema and adds any
//! table, column or index the latest layout expects, regardless of the
//! recorded version. This tolerates databases left half-upgraded by an
//! interrupted process or edited by hand.
//!
//! # Layout (version 3)
//!
//! | Table | Columns |
//! |-------|---------|
//! | `shards` | `domain`, `cx`, `cz`, `sy` (primary key), `score`, `create_time`, `presence_time`, `last_recovery_time` |
//! | `store_meta` | `key` (primary key), `value` -- holds `schema_version` and `active_time_ms` |

use sqlx::{SqliteConnection, SqlitePool};

use crate::error::DbError;

/// Highest schema version this build understands.
pub const SCHEMA_VERSION: i64 = 3;

/// `store_meta` key of the schema version.
pub(crate) const VERSION_KEY: &str = "schema_version";

/// `store_meta` key of the persisted active-time clock.
pub(crate) const ACTIVE_TIME_KEY: &str = "active_time_ms";

const CREATE_META: &str = r"CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY NOT NULL,
    value INTEGER NOT NULL
)";

const CREATE_SHARDS: &str = r"CREATE TABLE IF NOT EXISTS shards (
    domain TEXT NOT NULL,
    cx INTEGER NOT NULL,
    cz INTEGER NOT NULL,
    sy INTEGER NOT NULL,
    score REAL,
    PRIMARY KEY (domain, cx, cz, sy)
)";

const CREATE_PRESENCE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS shards_presence_idx ON shards (domain, presence_time)";

/// One schema change.
#[derive(Debug, Clone, Copy)]
enum Step {
    /// Run a statement verbatim. Must be idempotent.
    Sql(&'static str),
    /// Add a column unless it already exists.
    AddColumn {
        table: &'static str,
        column: &'static str,
        decl: &'static str,
    },
}

#[derive(Debug)]
struct Migration {
    version: i64,
    description: &'static str,
    steps: &'static [Step],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create shard table",
        steps: &[Step::Sql(CREATE_SHARDS)],
    },
    Migration {
        version: 2,
        description: "add result presence columns",
        steps: &[
            Step::AddColumn {
                table: "shards",
                column: "create_time",
                decl: "INTEGER",
            },
            Step::AddColumn {
                table: "shards",
                column: "presence_time",
                decl: "INTEGER",
            },
        ],
    },
    Migration {
        version: 3,
        description: "add recovery column and presence index",
        steps: &[
            Step::AddColumn {
                table: "shards",
                column: "last_recovery_time",
                decl: "INTEGER",
            },
            Step::Sql(CREATE_PRESENCE_INDEX),
        ],
    },
];

/// Everything the latest layout expects, checked by [`repair`].
const REPAIR_STEPS: &[Step] = &[
    Step::Sql(CREATE_SHARDS),
    Step::AddColumn {
        table: "shards",
        column: "score",
        decl: "REAL",
    },
    Step::AddColumn {
        table: "shards",
        column: "create_time",
        decl: "INTEGER",
    },
    Step::AddColumn {
        table: "shards",
        column: "presence_time",
        decl: "INTEGER",
    },
    Step::AddColumn {
        table: "shards",
        column: "last_recovery_time",
        decl: "INTEGER",
    },
    Step::Sql(CREATE_PRESENCE_INDEX),
];

/// Bring the database up to [`SCHEMA_VERSION`] and repair any drift.
///
/// # Errors
///
/// Returns [`DbError::SchemaTooNew`] if the database was written by a newer
/// build, [`DbError::Migration`] if a migration fails (that migration is
/// rolled back), or [`DbError::Sqlite`] for other failures.
pub async fn migrate(pool: &SqlitePool) -> Result<(), DbError> {
    sqlx::query(CREATE_META).execute(pool).await?;

    let current = current_version(pool).await?.unwrap_or(0);
    if current > SCHEMA_VERSION {
        return Err(DbError::SchemaTooNew {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        apply(pool, migration).await?;
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "Applied shard store migration"
        );
    }

    let repaired = repair(pool).await?;
    if repaired > 0 {
        tracing::warn!(repaired, "Repaired shard store schema drift");
    }
    Ok(())
}

/// Read the recorded schema version, if any.
///
/// # Errors
///
/// Returns [`DbError::Sqlite`] if the query fails.
pub async fn current_version(pool: &SqlitePool) -> Result<Option<i64>, DbError> {
    let version = sqlx::query_scalar::<_, i64>("SELECT value FROM store_meta WHERE key = ?1")
        .bind(VERSION_KEY)
        .fetch_optional(pool)
        .await?;
    Ok(version)
}

/// Add whatever the latest layout expects and the live schema lacks.
///
/// Idempotent. Returns the number of columns added.
///
/// # Errors
///
/// Returns [`DbError::Sqlite`] if introspection or a change fails; the
/// whole pass is rolled back in that case.
pub async fn repair(pool: &SqlitePool) -> Result<usize, DbError> {
    let mut tx = pool.begin().await?;
    let mut added: usize = 0;
    for step in REPAIR_STEPS {
        if run_step(&mut *tx, *step).await? {
            added = added.saturating_add(1);
        }
    }
    tx.commit().await?;
    Ok(added)
}

async fn apply(pool: &SqlitePool, migration: &Migration) -> Result<(), DbError> {
    let version = migration.version;
    let wrap = |source: sqlx::Error| DbError::Migration { version, source };

    let mut tx = pool.begin().await.map_err(wrap)?;
    for step in migration.steps {
        run_step(&mut *tx, *step).await.map_err(wrap)?;
    }
    sqlx::query(
        "INSERT INTO store_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(VERSION_KEY)
    .bind(version)
    .execute(&mut *tx)
    .await
    .map_err(wrap)?;
    // Dropping an uncommitted transaction rolls it back.
    tx.commit().await.map_err(wrap)?;
    Ok(())
}

/// Run one step. Returns `true` if a column was added.
async fn run_step(conn: &mut SqliteConnection, step: Step) -> Result<bool, sqlx::Error> {
    match step {
        Step::Sql(sql) => {
            sqlx::query(sql).execute(&mut *conn).await?;
            Ok(false)
        }
        Step::AddColumn {
            table,
            column,
            decl,
        } => {
            if column_exists(conn, table, column).await? {
                return Ok(false);
            }
            let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {decl}");
            sqlx::query(&sql).execute(&mut *conn).await?;
            Ok(true)
        }
    }
}

async fn column_exists(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
) -> Result<bool, sqlx::Error> {
    let columns = sqlx::query_scalar::<_, String>("SELECT name FROM pragma_table_info(?1)")
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;
    Ok(columns.iter().any(|name| name == column))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_sequential() {
        let versions: Vec<i64> = MIGRATIONS.iter().map(|m| m.version).collect();
        let expected: Vec<i64> = (1..=SCHEMA_VERSION).collect();
        assert_eq!(versions, expected);
    }

    #[test]
    fn repair_covers_every_added_column() {
        for migration in MIGRATIONS {
            for step in migration.steps {
                if let Step::AddColumn { column, .. } = step {
                    let covered = REPAIR_STEPS.iter().any(|repair_step| {
                        matches!(repair_step, Step::AddColumn { column: c, .. } if c == column)
                    });
                    assert!(covered, "repair pass misses column {column}");
                }
            }
        }
    }
}
