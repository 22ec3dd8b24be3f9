//! Incremental civilization scoring for voxel worlds.
//!
//! A civilization score in `[0, 1]` is computed for any world position from
//! the contents of the surrounding grid cells. Scores are served from a
//! two-tier cache that stays consistent under world mutation and forgets
//! regions nobody visits.
//!
//! # Modules
//!
//! - [`grid`] -- Cell mapping and the cubic neighborhood window.
//! - [`clock`] -- Persisted active-time clock and the wall clock.
//! - [`config`] -- YAML configuration into strongly-typed structs.
//! - [`scoring`] -- Per-block weight rules.
//! - [`world`] -- [`WorldView`] trait implemented by hosts.
//! - [`info`] -- Per-cell scores and their TTL cache.
//! - [`aggregate`] -- Distance-weighted core and outer sums.
//! - [`result`] -- Cached neighborhood aggregates with presence decay.
//! - [`propagate`] -- Delta propagation on content change.
//! - [`presence`] -- Agent-driven TTL refresh and decay recovery.
//! - [`engine`] -- [`CivEngine`], the facade driven by the host.
//!
//! [`WorldView`]: world::WorldView
//! [`CivEngine`]: engine::CivEngine

pub mod aggregate;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod grid;
pub mod info;
pub mod presence;
pub mod propagate;
pub mod result;
pub mod scoring;
pub mod world;

pub use engine::CivEngine;
pub use error::EngineError;
