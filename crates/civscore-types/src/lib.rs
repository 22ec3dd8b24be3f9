//! Shared value types for the civscore civilization scoring engine.
//!
//! This crate defines the identifiers and records that every other crate
//! in the workspace exchanges: grid cell coordinates, world positions,
//! agent keys, and the persisted shard row layout.
//!
//! # Modules
//!
//! - [`ids`] -- [`CellId`] and [`AgentKey`] identifiers.
//! - [`position`] -- [`BlockPos`] and [`WorldPos`] world coordinates.
//! - [`records`] -- [`ShardRow`] and [`PresenceRecord`] durable layouts.

pub mod ids;
pub mod position;
pub mod records;

pub use ids::{AgentKey, CellId, CELL_SHIFT, CELL_SIZE};
pub use position::{BlockPos, WorldPos};
pub use records::{PresenceRecord, ShardRow};
