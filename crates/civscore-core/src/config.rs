//! Configuration loading and typed config structures for the civscore engine.
//!
//! The configuration lives in a YAML file (by default `civscore.yaml`). This
//! module defines strongly-typed structs that mirror the YAML structure,
//! provides a loader, and validates value ranges after loading.

use std::path::Path;

use serde::Deserialize;

use crate::scoring::ScoringRule;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is out of its valid range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
///
/// Mirrors the structure of `civscore.yaml`. All fields have defaults, so
/// an empty document is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CivConfig {
    /// World vertical bounds.
    #[serde(default)]
    pub grid: GridConfig,

    /// Per-block weights and info-shard normalization.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Neighborhood aggregation tunables.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Absence decay and presence recovery.
    #[serde(default)]
    pub decay: DecayConfig,

    /// Hot-cache TTLs.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Presence sweep radii and cadence.
    #[serde(default)]
    pub presence: PresenceConfig,

    /// Active-time clock.
    #[serde(default)]
    pub clock: ClockConfig,

    /// Durable storage.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl CivConfig {
    /// Load and validate configuration from a YAML file.
    ///
    /// `CIVSCORE_DATABASE_URL` overrides `storage.url` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.storage.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid.min_y >= self.grid.max_y {
            return Err(invalid("grid.min_y must be below grid.max_y"));
        }
        if !(self.scoring.normalization_factor > 0.0) {
            return Err(invalid("scoring.normalization_factor must be positive"));
        }
        self.aggregation.validate()?;
        let decay = &self.decay;
        if !(0.0..=1.0).contains(&decay.min_decay_floor) {
            return Err(invalid("decay.min_decay_floor must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&decay.recovery_fraction) {
            return Err(invalid("decay.recovery_fraction must be within [0, 1]"));
        }
        if !(decay.decay_lambda >= 0.0) || !(decay.grace_period_hours >= 0.0) {
            return Err(invalid("decay.decay_lambda and decay.grace_period_hours must not be negative"));
        }
        if self.clock.step_ms <= 0 {
            return Err(invalid("clock.step_ms must be positive"));
        }
        if self.presence.interaction_range < 0 || self.presence.influence_radius < 0 {
            return Err(invalid("presence radii must not be negative"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.to_owned(),
    }
}

/// World vertical bounds, in blocks.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GridConfig {
    /// Lowest valid block Y (inclusive).
    #[serde(default = "default_min_y")]
    pub min_y: i32,

    /// Highest valid block Y (exclusive).
    #[serde(default = "default_max_y")]
    pub max_y: i32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            min_y: default_min_y(),
            max_y: default_max_y(),
        }
    }
}

/// Per-block weights and info-shard normalization.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoringConfig {
    /// Ordered scoring rules; a block's weight is the maximum over all rules.
    #[serde(default = "default_rules")]
    pub rules: Vec<ScoringRule>,

    /// Total cell weight that maps to an info score of 1.0.
    #[serde(default = "default_normalization_factor")]
    pub normalization_factor: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            normalization_factor: default_normalization_factor(),
        }
    }
}

/// Neighborhood aggregation tunables.
///
/// The radii form the config signature of every cached result entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AggregationConfig {
    /// Half-width, in cells, of the detection neighborhood.
    #[serde(default = "default_detection_radius")]
    pub detection_radius: i32,

    /// Half-width, in cells, of the non-decaying core box.
    #[serde(default = "default_core_radius")]
    pub core_radius: i32,

    /// Distance falloff: `w = 1 / (1 + alpha * d^2)`.
    #[serde(default = "default_distance_alpha")]
    pub distance_alpha: f64,

    /// Logistic steepness of the final normalization.
    #[serde(default = "default_logistic_k")]
    pub logistic_k: f64,

    /// Logistic midpoint of the final normalization.
    #[serde(default = "default_logistic_mid")]
    pub logistic_mid: f64,

    /// Score changes smaller than this are not propagated.
    #[serde(default = "default_delta_epsilon")]
    pub delta_epsilon: f64,
}

impl AggregationConfig {
    /// Check radius and curve ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.core_radius < 0 || self.detection_radius < self.core_radius {
            return Err(invalid(
                "aggregation radii must satisfy 0 <= core_radius <= detection_radius",
            ));
        }
        if self.detection_radius > MAX_DETECTION_RADIUS {
            return Err(invalid("aggregation.detection_radius is too large"));
        }
        if !(self.distance_alpha >= 0.0) || !(self.delta_epsilon >= 0.0) {
            return Err(invalid(
                "aggregation.distance_alpha and aggregation.delta_epsilon must not be negative",
            ));
        }
        if !(self.logistic_k > 0.0) || !self.logistic_k.is_finite() {
            return Err(invalid("aggregation.logistic_k must be positive and finite"));
        }
        if !self.logistic_mid.is_finite() || !self.distance_alpha.is_finite() {
            return Err(invalid("aggregation.logistic_mid and aggregation.distance_alpha must be finite"));
        }
        Ok(())
    }
}

/// Largest accepted detection radius, bounding the per-query window.
pub const MAX_DETECTION_RADIUS: i32 = 16;

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            detection_radius: default_detection_radius(),
            core_radius: default_core_radius(),
            distance_alpha: default_distance_alpha(),
            logistic_k: default_logistic_k(),
            logistic_mid: default_logistic_mid(),
            delta_epsilon: default_delta_epsilon(),
        }
    }
}

/// Absence decay and presence recovery.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DecayConfig {
    /// Hours of absence before the outer sum starts decaying.
    #[serde(default = "default_grace_period_hours")]
    pub grace_period_hours: f64,

    /// Exponential decay rate per hour past the grace period.
    #[serde(default = "default_decay_lambda")]
    pub decay_lambda: f64,

    /// Lower bound of the decay multiplier.
    #[serde(default = "default_min_decay_floor")]
    pub min_decay_floor: f64,

    /// Minimum active milliseconds between two recovery steps of one entry.
    #[serde(default = "default_recovery_cooldown_ms")]
    pub recovery_cooldown_ms: i64,

    /// Minimum presence advance per recovery step, in milliseconds.
    #[serde(default = "default_min_recovery_ms")]
    pub min_recovery_ms: i64,

    /// Fraction of the absence gap recovered per step.
    #[serde(default = "default_recovery_fraction")]
    pub recovery_fraction: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            grace_period_hours: default_grace_period_hours(),
            decay_lambda: default_decay_lambda(),
            min_decay_floor: default_min_decay_floor(),
            recovery_cooldown_ms: default_recovery_cooldown_ms(),
            min_recovery_ms: default_min_recovery_ms(),
            recovery_fraction: default_recovery_fraction(),
        }
    }
}

/// Hot-cache TTLs, in wall-clock milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
    /// Info shard TTL since last touch.
    #[serde(default = "default_info_ttl_ms")]
    pub info_ttl_ms: i64,

    /// Result entry TTL since last refresh.
    #[serde(default = "default_result_ttl_ms")]
    pub result_ttl_ms: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            info_ttl_ms: default_info_ttl_ms(),
            result_ttl_ms: default_result_ttl_ms(),
        }
    }
}

/// Presence sweep radii and cadence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresenceConfig {
    /// Active milliseconds between presence sweeps.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: i64,

    /// Extra cells added to the detection radius when touching info shards.
    #[serde(default = "default_interaction_range")]
    pub interaction_range: i32,

    /// Half-width, in cells, of the result entries an agent keeps alive.
    #[serde(default = "default_influence_radius")]
    pub influence_radius: i32,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval_ms(),
            interaction_range: default_interaction_range(),
            influence_radius: default_influence_radius(),
        }
    }
}

/// Active-time clock configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClockConfig {
    /// Active milliseconds added per simulation step.
    #[serde(default = "default_step_ms")]
    pub step_ms: i64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            step_ms: default_step_ms(),
        }
    }
}

/// Durable storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` connection URL.
    #[serde(default = "default_storage_url")]
    pub url: String,

    /// Domain (world or dimension) rows are keyed under.
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Maximum pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// I/O worker threads.
    #[serde(default = "default_io_workers")]
    pub io_workers: usize,

    /// Commands per write transaction.
    #[serde(default = "default_write_batch_size")]
    pub write_batch_size: usize,

    /// Wall-clock milliseconds between presence write-back flushes.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: i64,

    /// Wall-clock milliseconds between expiry cleanups.
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: i64,
}

impl StorageConfig {
    /// Override the storage URL with `CIVSCORE_DATABASE_URL` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CIVSCORE_DATABASE_URL") {
            self.url = val;
        }
    }

    /// Build the store configuration.
    pub fn store_config(&self) -> civscore_db::StoreConfig {
        civscore_db::StoreConfig::new(&self.url, &self.domain)
            .with_max_connections(self.max_connections)
            .with_io_workers(self.io_workers)
            .with_write_batch_size(self.write_batch_size)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: default_storage_url(),
            domain: default_domain(),
            max_connections: default_max_connections(),
            io_workers: default_io_workers(),
            write_batch_size: default_write_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const fn default_min_y() -> i32 {
    -64
}

const fn default_max_y() -> i32 {
    320
}

fn default_rules() -> Vec<ScoringRule> {
    ScoringRule::default_rules()
}

const fn default_normalization_factor() -> f64 {
    40.0
}

const fn default_detection_radius() -> i32 {
    3
}

const fn default_core_radius() -> i32 {
    1
}

const fn default_distance_alpha() -> f64 {
    0.5
}

const fn default_logistic_k() -> f64 {
    2.0
}

const fn default_logistic_mid() -> f64 {
    1.5
}

const fn default_delta_epsilon() -> f64 {
    1e-6
}

const fn default_grace_period_hours() -> f64 {
    2.0
}

const fn default_decay_lambda() -> f64 {
    0.1
}

const fn default_min_decay_floor() -> f64 {
    0.1
}

const fn default_recovery_cooldown_ms() -> i64 {
    60_000
}

const fn default_min_recovery_ms() -> i64 {
    60_000
}

const fn default_recovery_fraction() -> f64 {
    0.1
}

const fn default_info_ttl_ms() -> i64 {
    600_000
}

const fn default_result_ttl_ms() -> i64 {
    300_000
}

const fn default_sweep_interval_ms() -> i64 {
    1_000
}

const fn default_interaction_range() -> i32 {
    1
}

const fn default_influence_radius() -> i32 {
    2
}

const fn default_step_ms() -> i64 {
    50
}

fn default_storage_url() -> String {
    "sqlite://civscore.db".to_owned()
}

fn default_domain() -> String {
    "overworld".to_owned()
}

const fn default_max_connections() -> u32 {
    4
}

const fn default_io_workers() -> usize {
    2
}

const fn default_write_batch_size() -> usize {
    256
}

const fn default_flush_interval_ms() -> i64 {
    30_000
}

const fn default_cleanup_interval_ms() -> i64 {
    60_000
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = CivConfig::parse("{}").unwrap();
        assert_eq!(config, CivConfig::default());
        assert_eq!(config.aggregation.detection_radius, 3);
        assert_eq!(config.storage.domain, "overworld");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let yaml = r"
aggregation:
  detection_radius: 5
  core_radius: 2
decay:
  grace_period_hours: 0.5
";
        let config = CivConfig::parse(yaml).unwrap();
        assert_eq!(config.aggregation.detection_radius, 5);
        assert_eq!(config.aggregation.core_radius, 2);
        assert!((config.aggregation.distance_alpha - 0.5).abs() < f64::EPSILON);
        assert!((config.decay.grace_period_hours - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.cache, CacheConfig::default());
    }

    #[test]
    fn scoring_rules_parse_from_tagged_list() {
        let yaml = r"
scoring:
  normalization_factor: 10.0
  rules:
    - kind: exact
      weights:
        torch: 2.0
    - kind: keyword
      keyword: brick
      weight: 3.0
";
        let config = CivConfig::parse(yaml).unwrap();
        assert_eq!(config.scoring.rules.len(), 2);
    }

    #[test]
    fn core_radius_above_detection_radius_is_rejected() {
        let yaml = "aggregation:\n  detection_radius: 1\n  core_radius: 2\n";
        assert!(matches!(
            CivConfig::parse(yaml),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn inverted_vertical_bounds_are_rejected() {
        let yaml = "grid:\n  min_y: 10\n  max_y: 10\n";
        assert!(CivConfig::parse(yaml).is_err());
    }

    #[test]
    fn non_positive_normalization_is_rejected() {
        let yaml = "scoring:\n  normalization_factor: 0.0\n";
        assert!(CivConfig::parse(yaml).is_err());
    }

    #[test]
    fn nan_tunables_are_rejected() {
        for yaml in [
            "aggregation:\n  distance_alpha: .nan\n",
            "aggregation:\n  logistic_k: .nan\n",
            "aggregation:\n  logistic_mid: .nan\n",
            "aggregation:\n  delta_epsilon: .nan\n",
            "decay:\n  decay_lambda: .nan\n",
            "decay:\n  grace_period_hours: .nan\n",
            "decay:\n  min_decay_floor: .nan\n",
            "decay:\n  recovery_fraction: .nan\n",
            "scoring:\n  normalization_factor: .nan\n",
        ] {
            assert!(
                matches!(CivConfig::parse(yaml), Err(ConfigError::Invalid { .. })),
                "accepted {yaml:?}"
            );
        }
    }

    #[test]
    fn infinite_logistic_tunables_are_rejected() {
        assert!(CivConfig::parse("aggregation:\n  logistic_k: .inf\n").is_err());
        assert!(CivConfig::parse("aggregation:\n  logistic_mid: -.inf\n").is_err());
    }

    #[test]
    fn retuning_rejects_nan_alpha() {
        let aggregation = AggregationConfig {
            distance_alpha: f64::NAN,
            ..AggregationConfig::default()
        };
        assert!(aggregation.validate().is_err());
    }

    #[test]
    fn malformed_yaml_is_a_yaml_error() {
        assert!(matches!(
            CivConfig::parse("aggregation: [1, 2"),
            Err(ConfigError::Yaml { .. })
        ));
    }

    #[test]
    fn storage_builds_store_config() {
        let storage = StorageConfig::default();
        let store = storage.store_config();
        assert_eq!(store.url, "sqlite://civscore.db");
        assert_eq!(store.domain, "overworld");
        assert_eq!(store.io_workers, 2);
    }

    #[test]
    fn shipped_config_file_matches_defaults() {
        let config = CivConfig::parse(include_str!("../../../civscore.yaml")).unwrap();
        assert_eq!(config, CivConfig::default());
    }
}
