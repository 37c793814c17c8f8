#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]
// crates/alertpipe-config/src/lib.rs
// ============================================================================
// Module: Configuration
// Description: Typed, validated configuration for every stage binary.
// Purpose: Give each stage one way to load a TOML file (with an env
//          override for its path), fill in defaults, and reject an
//          out-of-range value before the stage starts running rather than
//          after.
// Dependencies: serde, thiserror, toml
// ============================================================================

//! ## Overview
//! Every stage's `main` calls [`PipelineConfig::load`] once at startup.
//! Fields absent from the TOML file take the defaults below; fields present
//! are checked by `validate()` before the config is handed to the stage.
//! This mirrors how the rest of the pipeline fails closed elsewhere (§7,
//! §8): a stage that cannot prove its own configuration is sane refuses to
//! start rather than running with a guessed value.

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Environment variable used to override the config file path.
pub const CONFIG_ENV_VAR: &str = "ALERTPIPE_CONFIG";
/// Default config file name when neither an explicit path nor the env
/// override is given.
pub const DEFAULT_CONFIG_NAME: &str = "alertpipe.toml";
/// Maximum accepted config file size. A config this large is almost
/// certainly the wrong file.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error, stringified (kept `Send + Sync + 'static`
        /// without pulling `std::io::Error` into the public API).
        source: String,
    },
    /// The config file exceeded [`MAX_CONFIG_FILE_SIZE`].
    #[error("config file {path} exceeds the {MAX_CONFIG_FILE_SIZE} byte limit")]
    TooLarge {
        /// Path of the oversized file.
        path: PathBuf,
    },
    /// The file was not valid TOML, or not shaped like [`PipelineConfig`].
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying parse error.
        source: String,
    },
    /// A field failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration shared across every stage binary. Each stage
/// reads only the sub-config it needs; an operator running all stages from
/// one file pays no cost for the fields other stages use.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    /// Shared infrastructure endpoints.
    #[serde(default)]
    pub connections: ConnectionsConfig,
    /// Snapshot Builder settings.
    #[serde(default)]
    pub snapshot_builder: SnapshotBuilderConfig,
    /// Matcher settings.
    #[serde(default)]
    pub matcher: MatcherConfig,
    /// Deduplicator settings.
    #[serde(default)]
    pub deduplicator: DeduplicatorConfig,
    /// Dispatcher settings.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Metrics flush/read settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl PipelineConfig {
    /// Loads and validates configuration from `path`, or from
    /// [`CONFIG_ENV_VAR`] if `path` is `None`, or [`DEFAULT_CONFIG_NAME`] in
    /// the current directory if neither is set and that file exists.
    /// Returns validated defaults if no config file is found anywhere.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if a config file exists but cannot be read,
    /// parsed, or validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = path.map(Path::to_path_buf).or_else(|| env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));

        let resolved = match resolved {
            Some(path) => path,
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_NAME);
                if default_path.exists() {
                    default_path
                } else {
                    let mut config = Self::default();
                    config.validate()?;
                    return Ok(config);
                }
            }
        };

        let metadata = fs::metadata(&resolved).map_err(|err| ConfigError::Io {
            path: resolved.clone(),
            source: err.to_string(),
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge { path: resolved });
        }
        let content = fs::read_to_string(&resolved).map_err(|err| ConfigError::Io {
            path: resolved.clone(),
            source: err.to_string(),
        })?;
        let mut config: Self = toml::from_str(&content).map_err(|err| ConfigError::Parse {
            path: resolved.clone(),
            source: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every sub-config.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first field found
    /// out of range.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.connections.validate()?;
        self.snapshot_builder.validate()?;
        self.matcher.validate()?;
        self.deduplicator.validate()?;
        self.dispatcher.validate()?;
        self.metrics.validate()?;
        Ok(())
    }
}

/// Shared infrastructure connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionsConfig {
    /// Postgres connection string for the relational store (§6).
    pub database_url: String,
    /// Max connections in the Postgres pool, shared across stages that
    /// embed the store crate directly.
    pub database_max_connections: u32,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/alertpipe".to_string(),
            database_max_connections: 10,
        }
    }
}

impl ConnectionsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::Invalid("connections.database_url must be set".to_string()));
        }
        if self.database_max_connections == 0 {
            return Err(ConfigError::Invalid(
                "connections.database_max_connections must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Snapshot Builder settings (§4.1).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotBuilderConfig {
    /// Consumer group name on the `rule.changed` topic.
    pub consumer_group: String,
    /// KV key the published snapshot is written under.
    pub snapshot_kv_key: String,
    /// Number of consecutive incremental-update failures before falling
    /// back to a full rebuild from the rule store (§9, Open Question
    /// decision: incremental-with-fallback).
    pub max_incremental_failures_before_rebuild: u32,
}

impl Default for SnapshotBuilderConfig {
    fn default() -> Self {
        Self {
            consumer_group: "snapshot-builder".to_string(),
            snapshot_kv_key: "rules:snapshot".to_string(),
            max_incremental_failures_before_rebuild: 3,
        }
    }
}

impl SnapshotBuilderConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.consumer_group.is_empty() {
            return Err(ConfigError::Invalid("snapshot_builder.consumer_group must be set".to_string()));
        }
        if self.snapshot_kv_key.is_empty() {
            return Err(ConfigError::Invalid("snapshot_builder.snapshot_kv_key must be set".to_string()));
        }
        if self.max_incremental_failures_before_rebuild == 0 {
            return Err(ConfigError::Invalid(
                "snapshot_builder.max_incremental_failures_before_rebuild must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Matcher settings (§4.2).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Consumer group name on the `alerts.new` topic.
    pub consumer_group: String,
    /// KV key the Matcher polls for a newer snapshot.
    pub snapshot_kv_key: String,
    /// How often, in milliseconds, the background refresh task checks the
    /// KV store for a newer snapshot version.
    pub snapshot_poll_interval_ms: u64,
    /// Number of bounded retries at warm start while waiting for the first
    /// snapshot to appear in the KV store.
    pub warm_start_max_attempts: u32,
    /// Delay, in milliseconds, between warm-start retries.
    pub warm_start_retry_delay_ms: u64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            consumer_group: "matcher".to_string(),
            snapshot_kv_key: "rules:snapshot".to_string(),
            snapshot_poll_interval_ms: 1_000,
            warm_start_max_attempts: 30,
            warm_start_retry_delay_ms: 1_000,
        }
    }
}

impl MatcherConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.consumer_group.is_empty() {
            return Err(ConfigError::Invalid("matcher.consumer_group must be set".to_string()));
        }
        if self.snapshot_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "matcher.snapshot_poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.warm_start_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "matcher.warm_start_max_attempts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Deduplicator settings (§4.3).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeduplicatorConfig {
    /// Consumer group name on the `alerts.matched` topic.
    pub consumer_group: String,
    /// Max records processed per batch before committing offsets.
    pub batch_size: usize,
}

impl Default for DeduplicatorConfig {
    fn default() -> Self {
        Self {
            consumer_group: "deduplicator".to_string(),
            batch_size: 100,
        }
    }
}

impl DeduplicatorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.consumer_group.is_empty() {
            return Err(ConfigError::Invalid("deduplicator.consumer_group must be set".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("deduplicator.batch_size must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// Dispatcher settings (§4.4, §5).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Consumer group name on the `notifications.ready` topic.
    pub consumer_group: String,
    /// Number of concurrent dispatch workers.
    pub worker_count: usize,
    /// Retry attempts per endpoint send before giving up on that endpoint.
    pub max_retry_attempts: u32,
    /// Base backoff delay in milliseconds before the first retry.
    pub retry_base_delay_ms: u64,
    /// Backoff cap in milliseconds; no retry waits longer than this.
    pub retry_max_delay_ms: u64,
    /// Email channel token-bucket capacity (tokens, i.e. max burst sends).
    pub email_rate_limit_capacity: u32,
    /// Email channel token-bucket refill rate, in tokens per second.
    pub email_rate_limit_refill_per_second: u32,
    /// HTTP client timeout in milliseconds for webhook sends.
    pub http_client_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            consumer_group: "dispatcher".to_string(),
            worker_count: 8,
            max_retry_attempts: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            email_rate_limit_capacity: 50,
            email_rate_limit_refill_per_second: 10,
            http_client_timeout_ms: 5_000,
        }
    }
}

impl DispatcherConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.consumer_group.is_empty() {
            return Err(ConfigError::Invalid("dispatcher.consumer_group must be set".to_string()));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("dispatcher.worker_count must be greater than zero".to_string()));
        }
        if self.max_retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher.max_retry_attempts must be greater than zero".to_string(),
            ));
        }
        if self.retry_base_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher.retry_base_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(ConfigError::Invalid(
                "dispatcher.retry_max_delay_ms must be at least retry_base_delay_ms".to_string(),
            ));
        }
        if self.email_rate_limit_capacity == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher.email_rate_limit_capacity must be greater than zero".to_string(),
            ));
        }
        if self.http_client_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher.http_client_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Metrics flush and read-endpoint settings (§10).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// How often, in milliseconds, a stage flushes its in-process counters
    /// to the `metrics:<service>` KV key.
    pub flush_interval_ms: u64,
    /// Bind address for the per-process `GET /metrics` read endpoint.
    pub bind_address: String,
    /// Minimum severity the audit sink forwards (§6, "log level"; §10,
    /// "ambient logging concern"). Events below this level are dropped
    /// before they reach the sink's output.
    pub log_level: LogLevel,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 10_000,
            bind_address: "127.0.0.1:9100".to_string(),
            log_level: LogLevel::Info,
        }
    }
}

impl MetricsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid("metrics.flush_interval_ms must be greater than zero".to_string()));
        }
        if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "metrics.bind_address {:?} is not a valid socket address",
                self.bind_address
            )));
        }
        Ok(())
    }
}

/// Severity threshold for the audit sink (§6, §10). Ordered from least to
/// most severe so a configured level gates everything below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Every event, including ones a production deployment would consider
    /// noise.
    Debug,
    /// Routine events: snapshot publication, notification transitions.
    Info,
    /// Events worth a human's attention but not yet a failure: poison
    /// messages, retryable send failures.
    Warn,
    /// Events that represent a permanent failure of some unit of work.
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let mut config = PipelineConfig::default();
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn rejects_retry_max_below_base() {
        let mut dispatcher = DispatcherConfig::default();
        dispatcher.retry_max_delay_ms = dispatcher.retry_base_delay_ms - 1;
        assert!(dispatcher.validate().is_err());
    }

    #[test]
    fn rejects_invalid_bind_address() {
        let metrics = MetricsConfig {
            bind_address: "not-an-address".to_string(),
            ..MetricsConfig::default()
        };
        assert!(metrics.validate().is_err());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let toml_text = r#"
            [dispatcher]
            worker_count = 16
        "#;
        let mut config: PipelineConfig = toml::from_str(toml_text).expect("parses");
        config.validate().expect("valid");
        assert_eq!(config.dispatcher.worker_count, 16);
        assert_eq!(config.dispatcher.max_retry_attempts, 3);
    }

    #[test]
    fn log_level_defaults_to_info_and_orders_by_severity() {
        assert_eq!(MetricsConfig::default().log_level, LogLevel::Info);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn parses_log_level_from_toml() {
        let toml_text = r#"
            [metrics]
            log_level = "warn"
        "#;
        let config: PipelineConfig = toml::from_str(toml_text).expect("parses");
        assert_eq!(config.metrics.log_level, LogLevel::Warn);
    }
}
