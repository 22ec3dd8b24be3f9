//! Engine error type.
//!
//! Durable-store read failures never surface here: they are logged and
//! treated as absent entries. Only startup, clock persistence and the final
//! flush propagate errors.

use civscore_db::DbError;

use crate::clock::ClockError;
use crate::config::ConfigError;

/// Errors returned by [`CivEngine`](crate::engine::CivEngine) operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid configuration.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// The active-time clock could not advance.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },

    /// The durable store failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: DbError,
    },
}
