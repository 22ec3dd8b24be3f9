//! Durable storage for the civscore engine.
//!
//! The engine keeps every live value in in-process hot caches. This crate
//! provides the cold tier behind them: one row per cell holding the last
//! computed info score and the decay fields of the result entry centred on
//! that cell, plus the persisted active-time clock.
//!
//! # Architecture
//!
//! ```text
//! Simulation thread
//!     |
//!     +-- save_score / save_presence / save_active_time --> write channel --> writer task (batched upserts)
//!     +-- load_row (sync point read) ---------------------> write channel --> writer task --> reply
//!     +-- request_score ----------------> load task -----> loaded channel --> drain_loaded
//! ```
//!
//! All I/O runs on a small dedicated `tokio` runtime owned by the store, so
//! the simulation thread never awaits.
//!
//! # Modules
//!
//! - [`store`] -- The [`ShardStore`] trait consumed by the engine.
//! - [`sqlite`] -- [`SqliteStore`], the `sqlx` backed implementation.
//! - [`schema`] -- Versioned migrations and the repair pass.
//! - [`memory`] -- [`MemoryStore`], an in-process implementation for tests.
//! - [`error`] -- Shared error types.

pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod store;
mod writer;

pub use error::DbError;
pub use memory::MemoryStore;
pub use schema::SCHEMA_VERSION;
pub use sqlite::{SqliteStore, StoreConfig};
pub use store::{LoadedScore, ShardStore};
