//! Host binary for the civilization scoring engine.
//!
//! Wires a synthetic voxel world and a handful of wandering agents to a
//! [`CivEngine`] backed by the SQLite shard store, and runs a bounded
//! simulation. Rerunning against the same database resumes the persisted
//! active-time clock and decay state.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `CIVSCORE_CONFIG` or `civscore.yaml`
//! 3. Open the shard store (migrate, repair)
//! 4. Open the engine and restore the clock
//! 5. Run the step loop: build, wander, tick, maintain
//! 6. Shut down (also after a failed step): apply pending cascades, flush
//!    presence, persist the clock, compact the store
//!
//! Set `CIVSCORE_LOG_FORMAT=json` for JSON log lines. Filtering follows
//! `RUST_LOG`.

mod error;
mod host;
mod world;

use std::path::{Path, PathBuf};
use std::time::Duration;

use civscore_core::clock::ActiveClock;
use civscore_core::config::CivConfig;
use civscore_core::CivEngine;
use civscore_db::SqliteStore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::error::AppError;
use crate::host::{Host, HostConfig};
use crate::world::SyntheticWorld;

/// Config file used when `CIVSCORE_CONFIG` is unset.
const DEFAULT_CONFIG_PATH: &str = "civscore.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if startup, a simulation step, or shutdown fails.
fn main() -> Result<(), AppError> {
    // 1. Initialize structured logging.
    init_tracing();
    info!("civscore-engine starting");

    // 2. Load configuration.
    let config_path = config_path();
    let config = load_config(&config_path)?;
    let host_config = load_host_config(&config_path)?;
    info!(
        path = %config_path.display(),
        detection_radius = config.aggregation.detection_radius,
        core_radius = config.aggregation.core_radius,
        step_ms = config.clock.step_ms,
        "Configuration loaded"
    );

    // 3. Open the shard store.
    let store_config = config.storage.store_config();
    let store = SqliteStore::open(&store_config)?;
    let schema_version = store.schema_version()?;
    info!(
        url = %store_config.url,
        domain = store.domain(),
        schema_version = ?schema_version,
        "Shard store opened"
    );

    // 4. Open the engine.
    let clock = ActiveClock::new(&config.clock);
    let mut engine = CivEngine::open(config, Box::new(clock), Box::new(store))?;

    // 5. Run the step loop.
    let mut world = SyntheticWorld::new();
    let mut host = Host::new(host_config);
    let outcome = run(&mut engine, &mut world, &mut host);

    // 6. Shut down, on success and on failure alike.
    finish(engine, &world, outcome)?;
    info!("civscore-engine shutdown complete");
    Ok(())
}

/// Shut `engine` down, then report the step loop's outcome. A shutdown
/// failure wins over a step failure, which is logged.
fn finish(engine: CivEngine, world: &SyntheticWorld, outcome: Result<(), AppError>) -> Result<(), AppError> {
    if let Err(e) = &outcome {
        error!(error = %e, "Simulation step failed, shutting down");
    }
    engine.shutdown(world)?;
    outcome
}

/// Drive the simulation for the configured number of steps.
fn run(engine: &mut CivEngine, world: &mut SyntheticWorld, host: &mut Host) -> Result<(), AppError> {
    let pause = Duration::from_millis(host.config().tick_pause_ms);
    let report_every = host.config().report_every;
    info!(
        ticks = host.config().ticks,
        agents = host.agents().len(),
        "Entering step loop"
    );

    for step in 1..=host.config().ticks {
        for (pos, origin) in host.build(world) {
            let _ = engine.on_cell_content_changed(world, pos, origin);
        }
        host.wander();
        engine.tick(world)?;
        let _ = engine.maintain(host.agents());

        if step.checked_rem(report_every) == Some(0) {
            report(engine, world, host, step);
        }
        if !pause.is_zero() {
            std::thread::sleep(pause);
        }
    }

    let stats = engine.stats();
    info!(
        active_ms = stats.active_ms,
        blocks = world.block_count(),
        mutations = stats.mutations,
        pending_cascades = stats.pending_cascades,
        info_entries = stats.info_entries,
        result_entries = stats.result_entries,
        hits = stats.results.hits,
        misses = stats.results.misses,
        restored = stats.results.restored,
        "Simulation finished"
    );
    Ok(())
}

/// Install the global subscriber. JSON output when
/// `CIVSCORE_LOG_FORMAT=json`, human-readable otherwise.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("CIVSCORE_LOG_FORMAT").is_ok_and(|format| format == "json");
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

fn config_path() -> PathBuf {
    std::env::var_os("CIVSCORE_CONFIG").map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Load the engine configuration, falling back to defaults when the file
/// does not exist.
fn load_config(path: &Path) -> Result<CivConfig, AppError> {
    if path.exists() {
        Ok(CivConfig::from_file(path)?)
    } else {
        info!(path = %path.display(), "Config file not found, using defaults");
        let mut config = CivConfig::default();
        config.storage.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

/// Load the `host` section of the config file, or defaults.
fn load_host_config(path: &Path) -> Result<HostConfig, AppError> {
    if !path.exists() {
        return Ok(HostConfig::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| AppError::Host {
        message: format!("failed to read config file: {e}"),
    })?;
    let raw: serde_yml::Value = serde_yml::from_str(&contents).map_err(|e| AppError::Host {
        message: format!("failed to parse config YAML: {e}"),
    })?;
    match raw.get("host") {
        Some(section) => serde_yml::from_value(section.clone()).map_err(|e| AppError::Host {
            message: format!("failed to parse host config: {e}"),
        }),
        None => Ok(HostConfig::default()),
    }
}

/// Log the score under every agent.
fn report(engine: &mut CivEngine, world: &SyntheticWorld, host: &Host, step: u64) {
    for agent in host.agents() {
        let score = engine.score_at(world, agent.pos);
        info!(
            step,
            agent = %agent.key,
            x = agent.pos.x,
            z = agent.pos.z,
            score,
            "Civilization score"
        );
    }
    let stats = engine.stats();
    info!(
        step,
        active_ms = stats.active_ms,
        info_entries = stats.info_entries,
        result_entries = stats.result_entries,
        dirty_presence = stats.dirty_presence,
        pending_loads = stats.pending_loads,
        "Engine stats"
    );
}
