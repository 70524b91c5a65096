//! Runtime configuration for the agent layer.
//!
//! Loaded from a TOML file with sensible defaults for every field covering
//! every tunable the runtime exposes.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AgentError, Result};

/// Tunable runtime parameters shared across the orchestrator, workers, and
/// proactive scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of workers allowed to execute concurrently.
    pub max_concurrent_workers: usize,
    /// Capacity of the bounded task queue.
    pub task_queue_capacity: usize,
    /// Default timeout for request/response message bus exchanges.
    pub message_response_timeout_seconds: u64,
    /// Per-worker concurrent task execution cap.
    pub worker_concurrent_cap: usize,
    /// Backoff before re-checking a task whose dependencies are unmet.
    pub dependency_backoff_seconds: u64,
    /// Backoff before re-checking a task with no capable worker.
    pub unassignable_backoff_seconds: u64,
    /// Default TTL, in hours, for context memory entries.
    pub context_default_ttl_hours: i64,
    /// Retention window, in days, for task results and interactions.
    pub memory_retention_days: i64,
    /// Whether the proactive scheduler is enabled.
    pub proactive_mode: bool,
    /// Whether failed tasks are automatically retried (no-repeat-instance).
    pub failure_recovery: bool,
    /// TTL, in seconds, for the event router's result cache.
    pub event_cache_ttl_seconds: u64,
    /// Maximum retry attempts for an event before it is dropped.
    pub event_retry_limit: u32,
    /// Maximum retry attempts for a task before it is abandoned.
    pub max_task_retries: u32,
    /// How often the orchestrator's health monitor inspects workers for an
    /// `Error` status to reset.
    pub health_check_interval_seconds: u64,
    /// Filesystem path to the SQLite memory database.
    pub memory_db_path: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workers: 5,
            task_queue_capacity: 1000,
            message_response_timeout_seconds: 30,
            worker_concurrent_cap: 3,
            dependency_backoff_seconds: 2,
            unassignable_backoff_seconds: 5,
            context_default_ttl_hours: 24,
            memory_retention_days: 90,
            proactive_mode: true,
            failure_recovery: true,
            event_cache_ttl_seconds: 300,
            event_retry_limit: 3,
            max_task_retries: 3,
            health_check_interval_seconds: 10,
            memory_db_path: "data/relay.db".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file, falling back to defaults for any
    /// field the file does not specify. If the file does not exist, the
    /// default configuration is returned unmodified.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "runtime config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| AgentError::ConfigError {
            reason: format!("failed to read config file: {e}"),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| AgentError::ConfigError {
            reason: format!("failed to parse TOML config: {e}"),
        })?;

        info!(path = %path.display(), "runtime config loaded");
        Ok(config)
    }

    /// Write the current configuration to a TOML file.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| AgentError::ConfigError {
            reason: format!("failed to serialize config: {e}"),
        })?;
        std::fs::write(path, content).map_err(|e| AgentError::ConfigError {
            reason: format!("failed to write config file: {e}"),
        })?;
        Ok(())
    }

    /// Overrides individual fields from environment variables
    /// (`RELAY_MAX_CONCURRENT_WORKERS`, `RELAY_WORKER_CONCURRENT_CAP`,
    /// `RELAY_MEMORY_DB_PATH`), applied on top of whatever was loaded from a
    /// TOML file or the defaults. Intended for test and deployment overrides
    /// without hand-editing a config file; callers typically run
    /// `dotenvy::dotenv().ok()` first to populate the process environment
    /// from a local `.env` file.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("RELAY_MAX_CONCURRENT_WORKERS") {
            if let Ok(parsed) = val.parse() {
                self.max_concurrent_workers = parsed;
            }
        }
        if let Ok(val) = std::env::var("RELAY_WORKER_CONCURRENT_CAP") {
            if let Ok(parsed) = val.parse() {
                self.worker_concurrent_cap = parsed;
            }
        }
        if let Ok(val) = std::env::var("RELAY_MEMORY_DB_PATH") {
            self.memory_db_path = val;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.max_concurrent_workers, 5);
        assert_eq!(cfg.max_task_retries, 3);
        assert!(cfg.proactive_mode);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = RuntimeConfig::load_from_file("/nonexistent/path/relay.toml").unwrap();
        assert_eq!(cfg.task_queue_capacity, 1000);
    }

    #[test]
    fn env_overrides_apply_on_top_of_defaults() {
        std::env::set_var("RELAY_MAX_CONCURRENT_WORKERS", "9");
        let cfg = RuntimeConfig::default().apply_env_overrides();
        assert_eq!(cfg.max_concurrent_workers, 9);
        std::env::remove_var("RELAY_MAX_CONCURRENT_WORKERS");
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        let mut cfg = RuntimeConfig::default();
        cfg.max_concurrent_workers = 8;
        cfg.save_to_file(&path).unwrap();

        let loaded = RuntimeConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.max_concurrent_workers, 8);
    }
}
