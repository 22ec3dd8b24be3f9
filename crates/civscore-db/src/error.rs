//! Error types for the shard store.
//!
//! All fallible store operations return [`DbError`]. Callers on the
//! scoring path log these and fall back to "entry absent"; only startup
//! and shutdown propagate them.

/// Errors that can occur in the shard store.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// A schema migration failed and was rolled back.
    #[error("migration to schema version {version} failed: {source}")]
    Migration {
        /// The version whose migration failed.
        version: i64,
        /// The underlying database error.
        source: sqlx::Error,
    },

    /// The database was written by a newer build.
    #[error("schema version {found} is newer than supported version {supported}")]
    SchemaTooNew {
        /// Version recorded in the database.
        found: i64,
        /// Highest version this build understands.
        supported: i64,
    },

    /// The I/O runtime could not be created.
    #[error("I/O runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    /// The background writer has stopped or the store is closed.
    #[error("shard store writer is not running")]
    WorkerGone,

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_too_new_display() {
        let err = DbError::SchemaTooNew {
            found: 9,
            supported: 3,
        };
        let msg = format!("{err}");
        assert!(msg.contains('9'));
        assert!(msg.contains('3'));
    }

    #[test]
    fn migration_display_names_version() {
        let err = DbError::Migration {
            version: 2,
            source: sqlx::Error::RowNotFound,
        };
        assert!(format!("{err}").contains("version 2"));
    }
}
