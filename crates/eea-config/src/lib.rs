// crates/eea-config/src/lib.rs
// ============================================================================
// Crate: eea-config
// Description: TOML-based configuration model and strict, fail-closed
// loader for the aggregator interval, store path, sandboxed HTTP limits,
// and action-dispatch defaults.
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path
//! limits, then validated for internal consistency before any other crate
//! sees it. Missing or invalid configuration fails closed.
//!
//! Grounded on `decision-gate-config`'s `DecisionGateConfig::load`/
//! `validate` pair (`config.rs`): resolve a path from an explicit
//! argument, an environment variable, or a default filename; reject
//! oversized files and non-UTF-8 content before parsing; validate every
//! section after `serde` deserialization rather than trusting field
//! defaults alone.

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Default configuration filename used when no path is given.
const DEFAULT_CONFIG_NAME: &str = "eea.toml";
/// Environment variable used to override the config path.
const CONFIG_ENV_VAR: &str = "EEA_CONFIG";
/// Maximum configuration file size accepted by [`EeaConfig::load`].
const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

/// Default evaluation-lock interval, in seconds (spec.md §4.2's "typical: 30").
const DEFAULT_LOCK_INTERVAL_SECONDS: u32 = 30;
/// Default interval between flush-scheduler polls of the flush queue.
const DEFAULT_FLUSH_POLL_INTERVAL_MS: u64 = 1_000;
/// Default SQLite writer-thread busy timeout.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default sandboxed HTTP request deadline.
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;
/// Default sandboxed HTTP response body cap.
const DEFAULT_HTTP_MAX_RESPONSE_BYTES: usize = 1024 * 1024;
/// Default `User-Agent` sent by the sandboxed HTTP client.
const DEFAULT_HTTP_USER_AGENT: &str = "eea-sandbox/0.1";
/// Default cap on rule evaluations dispatching actions concurrently.
const DEFAULT_MAX_CONCURRENT_DISPATCHES: usize = 8;
/// Default per-dispatch wall-clock budget.
const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 30_000;

/// Full configuration for one EEA process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EeaConfig {
    /// Rate-limit gate and flush-scheduler tuning (C2/C3).
    pub aggregator: AggregatorConfig,
    /// Persistent store location and tuning.
    pub store: StoreConfig,
    /// Bounded HTTP client limits exposed to predicates as `http.send`.
    pub sandbox_http: SandboxHttpConfig,
    /// Action-dispatch defaults (C6).
    pub actions: ActionsConfig,
}

impl Default for EeaConfig {
    fn default() -> Self {
        Self {
            aggregator: AggregatorConfig::default(),
            store: StoreConfig::default(),
            sandbox_http: SandboxHttpConfig::default(),
            actions: ActionsConfig::default(),
        }
    }
}

impl EeaConfig {
    /// Loads and validates configuration from `path`, falling back to the
    /// [`CONFIG_ENV_VAR`] environment variable and then
    /// [`DEFAULT_CONFIG_NAME`] when `path` is `None`.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the resolved path is rejected, the file
    /// cannot be read, exceeds [`MAX_CONFIG_FILE_SIZE`], is not valid UTF-8,
    /// fails to parse as TOML, or fails post-parse validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|source| ConfigError::Io(source.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_owned()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_err| ConfigError::Invalid("config file must be utf-8".to_owned()))?;
        let config: Self =
            toml::from_str(content).map_err(|source| ConfigError::Parse(source.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section for internal consistency.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first section that
    /// fails a limit check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.aggregator.validate()?;
        self.store.validate()?;
        self.sandbox_http.validate()?;
        self.actions.validate()?;
        Ok(())
    }
}

/// Tuning for the rate-limit gate (C2) and flush scheduler (C3).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// The evaluation-lock cool-down interval, in seconds.
    pub lock_interval_seconds: u32,
    /// How often the flush scheduler polls the flush queue, in milliseconds.
    pub flush_poll_interval_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            lock_interval_seconds: DEFAULT_LOCK_INTERVAL_SECONDS,
            flush_poll_interval_ms: DEFAULT_FLUSH_POLL_INTERVAL_MS,
        }
    }
}

impl AggregatorConfig {
    /// Rejects a zero interval in either field, which would defeat rate-limiting.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "aggregator.lock_interval_seconds must be greater than zero".to_owned(),
            ));
        }
        if self.flush_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "aggregator.flush_poll_interval_ms must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Persistent store location and connection tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Filesystem path to the SQLite database file.
    pub database_path: PathBuf,
    /// SQLite busy timeout, in milliseconds, applied by the writer thread.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("eea.sqlite3"),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl StoreConfig {
    /// Rejects an empty or over-long database path and an unreasonable busy timeout.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_path_string("store.database_path", &self.database_path.to_string_lossy())?;
        if self.busy_timeout_ms == 0 || self.busy_timeout_ms > 60_000 {
            return Err(ConfigError::Invalid(
                "store.busy_timeout_ms must be between 1 and 60000".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Limits applied to the sandboxed `http.send` helper (spec.md §4.5).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxHttpConfig {
    /// Per-request deadline, in milliseconds.
    pub timeout_ms: u64,
    /// Maximum response body size, in bytes.
    pub max_response_bytes: usize,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
}

impl Default for SandboxHttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
            max_response_bytes: DEFAULT_HTTP_MAX_RESPONSE_BYTES,
            user_agent: DEFAULT_HTTP_USER_AGENT.to_owned(),
        }
    }
}

impl SandboxHttpConfig {
    /// Rejects a zero/excessive timeout or body cap and an empty `User-Agent`.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 || self.timeout_ms > 60_000 {
            return Err(ConfigError::Invalid(
                "sandbox_http.timeout_ms must be between 1 and 60000".to_owned(),
            ));
        }
        if self.max_response_bytes == 0 || self.max_response_bytes > 10 * 1024 * 1024 {
            return Err(ConfigError::Invalid(
                "sandbox_http.max_response_bytes must be between 1 and 10485760".to_owned(),
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "sandbox_http.user_agent must be non-empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Defaults governing the action dispatcher (C6).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    /// Maximum number of evaluations dispatching actions concurrently.
    pub max_concurrent_dispatches: usize,
    /// Per-dispatch wall-clock budget, in milliseconds.
    pub dispatch_timeout_ms: u64,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_dispatches: DEFAULT_MAX_CONCURRENT_DISPATCHES,
            dispatch_timeout_ms: DEFAULT_DISPATCH_TIMEOUT_MS,
        }
    }
}

impl ActionsConfig {
    /// Rejects a zero concurrency cap or an unreasonable dispatch timeout.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_dispatches == 0 || self.max_concurrent_dispatches > 256 {
            return Err(ConfigError::Invalid(
                "actions.max_concurrent_dispatches must be between 1 and 256".to_owned(),
            ));
        }
        if self.dispatch_timeout_ms == 0 || self.dispatch_timeout_ms > 300_000 {
            return Err(ConfigError::Invalid(
                "actions.dispatch_timeout_ms must be between 1 and 300000".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading the configuration file.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing failure.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Resolves the config path from an explicit argument, the environment, or the default filename.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_owned()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved config path's total and per-component length.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    validate_path_string("config path", &path.to_string_lossy())
}

/// Validates a path-shaped configuration value against length limits.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        let component_value = component.as_os_str().to_string_lossy();
        if component_value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::missing_docs_in_private_items,
    clippy::expect_used,
    reason = "Test-only helpers keep documentation concise and use expect for setup assertions."
)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_successfully() {
        EeaConfig::default().validate().expect("defaults are valid");
    }

    #[test]
    fn zero_lock_interval_is_rejected() {
        let mut config = EeaConfig::default();
        config.aggregator.lock_interval_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_user_agent_is_rejected() {
        let mut config = EeaConfig::default();
        config.sandbox_http.user_agent = "  ".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_parses_a_partial_toml_document_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("eea.toml");
        fs::write(&path, "[aggregator]\nlock_interval_seconds = 60\n").expect("writes");

        let config = EeaConfig::load(Some(&path)).expect("loads");
        assert_eq!(config.aggregator.lock_interval_seconds, 60);
        assert_eq!(config.aggregator.flush_poll_interval_ms, DEFAULT_FLUSH_POLL_INTERVAL_MS);
    }

    #[test]
    fn load_rejects_an_oversized_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("eea.toml");
        let oversized = "a".repeat(MAX_CONFIG_FILE_SIZE + 1);
        fs::write(&path, oversized).expect("writes");

        let error = EeaConfig::load(Some(&path)).expect_err("rejects");
        assert!(matches!(error, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_rejects_invalid_values_after_parsing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("eea.toml");
        fs::write(&path, "[actions]\nmax_concurrent_dispatches = 0\n").expect("writes");

        let error = EeaConfig::load(Some(&path)).expect_err("rejects");
        assert!(matches!(error, ConfigError::Invalid(_)));
    }
}
