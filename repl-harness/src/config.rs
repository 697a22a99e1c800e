//! Configuration loading for the harness.
//!
//! Configuration is loaded from a TOML file. Every field has a default, so
//! an empty file (or no file at all) yields [`HarnessConfig::default`].

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use repl_core::SyncPointPair;
use repl_types::{INITIAL_SYNC_SYNC_POINT_1, INITIAL_SYNC_SYNC_POINT_2};

/// Root configuration for the harness.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Polling and timeout configuration.
    pub waits: WaitConfig,
    /// Rollback controller configuration.
    pub rollback: RollbackConfig,
    /// Initial-sync controller configuration.
    pub initial_sync: InitialSyncConfig,
    /// Simulated replica-set configuration.
    pub sim: SimConfig,
}

/// Polling and timeout configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WaitConfig {
    /// Upper bound for every wait, in seconds (default: 600).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// First interval between polls in milliseconds (default: 10).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Largest interval between polls in milliseconds (default: 250).
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,
}

/// Rollback controller configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RollbackConfig {
    /// Seconds the old primary stays ineligible for election after it is
    /// forced to step down (default: 1).
    #[serde(default = "default_step_down_freeze_secs")]
    pub step_down_freeze_secs: u64,
    /// Namespace of the document written to guarantee something to roll back
    /// (default: `rollback_test.guaranteed`).
    #[serde(default = "default_guaranteed_namespace")]
    pub guaranteed_namespace: String,
}

/// Initial-sync controller configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct InitialSyncConfig {
    /// Pause point checked first; forced on at restart.
    #[serde(default = "default_upstream_point")]
    pub upstream_point: String,
    /// Pause point checked second.
    #[serde(default = "default_downstream_point")]
    pub downstream_point: String,
    /// Initial-sync attempts the syncing node may make (default: 1).
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Oplog entries applied per batch by the syncing node (default: unset).
    pub batch_limit_operations: Option<u32>,
}

/// Simulated replica-set configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    /// Simulated ticks per second, used to convert freeze periods (default: 10).
    #[serde(default = "default_ticks_per_second")]
    pub ticks_per_second: u32,
    /// Ticks a primary tolerates without a voting majority (default: 3).
    #[serde(default = "default_stepdown_grace_ticks")]
    pub stepdown_grace_ticks: u32,
    /// Oplog entries a secondary applies per tick (default: 50).
    #[serde(default = "default_apply_batch_size")]
    pub apply_batch_size: usize,
    /// Documents copied per clone command during initial sync (default: 25).
    #[serde(default = "default_clone_batch_size")]
    pub clone_batch_size: usize,
    /// Initial-sync commands run per tick when nothing pauses (default: 64).
    #[serde(default = "default_max_sync_commands_per_tick")]
    pub max_sync_commands_per_tick: usize,
    /// Lines kept in each node's in-memory log (default: 1024).
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

// Default value functions
fn default_timeout_secs() -> u64 {
    600 // 10 minutes
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_max_poll_interval_ms() -> u64 {
    250
}

fn default_step_down_freeze_secs() -> u64 {
    1
}

fn default_guaranteed_namespace() -> String {
    "rollback_test.guaranteed".to_string()
}

fn default_upstream_point() -> String {
    INITIAL_SYNC_SYNC_POINT_1.to_string()
}

fn default_downstream_point() -> String {
    INITIAL_SYNC_SYNC_POINT_2.to_string()
}

fn default_attempts() -> u32 {
    1
}

fn default_ticks_per_second() -> u32 {
    10
}

fn default_stepdown_grace_ticks() -> u32 {
    3
}

fn default_apply_batch_size() -> usize {
    50
}

fn default_clone_batch_size() -> usize {
    25
}

fn default_max_sync_commands_per_tick() -> usize {
    64
}

fn default_log_capacity() -> usize {
    1024
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
        }
    }
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            step_down_freeze_secs: default_step_down_freeze_secs(),
            guaranteed_namespace: default_guaranteed_namespace(),
        }
    }
}

impl Default for InitialSyncConfig {
    fn default() -> Self {
        Self {
            upstream_point: default_upstream_point(),
            downstream_point: default_downstream_point(),
            attempts: default_attempts(),
            batch_limit_operations: None,
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: default_ticks_per_second(),
            stepdown_grace_ticks: default_stepdown_grace_ticks(),
            apply_batch_size: default_apply_batch_size(),
            clone_batch_size: default_clone_batch_size(),
            max_sync_commands_per_tick: default_max_sync_commands_per_tick(),
            log_capacity: default_log_capacity(),
        }
    }
}

impl WaitConfig {
    /// Wait timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl InitialSyncConfig {
    /// The configured upstream and downstream pause points.
    pub fn sync_points(&self) -> SyncPointPair {
        SyncPointPair::new(self.upstream_point.as_str(), self.downstream_point.as_str())
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
