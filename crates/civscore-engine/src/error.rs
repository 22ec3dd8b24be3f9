//! Error types for the host binary.

/// Top-level error for the host binary.
///
/// Each variant wraps a subsystem error so `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: civscore_core::config::ConfigError,
    },

    /// Opening the shard store failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: civscore_db::DbError,
    },

    /// The scoring engine failed.
    #[error("engine error: {source}")]
    Engine {
        /// The underlying engine error.
        #[from]
        source: civscore_core::EngineError,
    },

    /// The `host` configuration section is malformed.
    #[error("host config error: {message}")]
    Host {
        /// Description of the failure.
        message: String,
    },
}
