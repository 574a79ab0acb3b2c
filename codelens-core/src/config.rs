//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/codelens/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/codelens/` (~/.config/codelens/)
//! - Data: `$XDG_DATA_HOME/codelens/` (~/.local/share/codelens/)
//! - State/Logs: `$XDG_STATE_HOME/codelens/` (~/.local/state/codelens/)

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Per-provider overrides keyed by provider id (`gemini`, `openai`, ...)
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderOverride>,

    /// Per-provider retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Cache and fallback settings
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Job pipeline settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Remote analysis store (optional)
    #[serde(default)]
    pub store: StoreConfig,

    /// Quota ledger settings
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Override for a catalog provider
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProviderOverride {
    /// Model to use instead of the catalog default
    pub model: Option<String>,
    /// Monthly request limit (free tier only)
    pub monthly_limit: Option<u32>,
    /// OpenAI-compatible base URL
    pub endpoint: Option<String>,
}

/// Retry settings for a single provider
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Fraction of each delay added as random jitter (0.0 disables)
    #[serde(default)]
    pub jitter: f64,

    /// Hard timeout for one provider call
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: 0.0,
            attempt_timeout_secs: default_attempt_timeout(),
        }
    }
}

impl RetryConfig {
    /// Build the runtime retry policy
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter.clamp(0.0, 1.0),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs.max(1)),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_attempt_timeout() -> u64 {
    60
}

/// Cache freshness and provider fallback
#[derive(Debug, Deserialize, Clone)]
pub struct CoordinatorConfig {
    /// Freshness window for single analyses
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,

    /// Freshness window for predictive scans
    #[serde(default = "default_predictive_freshness_secs")]
    pub predictive_freshness_secs: u64,

    /// Distinct providers tried before degrading
    #[serde(default = "default_max_provider_rounds")]
    pub max_provider_rounds: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            freshness_secs: default_freshness_secs(),
            predictive_freshness_secs: default_predictive_freshness_secs(),
            max_provider_rounds: default_max_provider_rounds(),
        }
    }
}

fn default_freshness_secs() -> u64 {
    5 * 60
}

fn default_predictive_freshness_secs() -> u64 {
    30 * 60
}

fn default_max_provider_rounds() -> usize {
    2
}

/// Job pipeline configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    /// Projects with more files than this get chunked file steps
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: usize,

    /// Files per chunked step
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Pause between steps
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,

    /// Concurrent file analyses inside one step
    #[serde(default = "default_file_concurrency")]
    pub file_concurrency: usize,

    /// Finished job snapshots kept for progress queries
    #[serde(default = "default_retained_jobs")]
    pub retained_jobs: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            chunk_threshold: default_chunk_threshold(),
            chunk_size: default_chunk_size(),
            step_delay_ms: default_step_delay_ms(),
            file_concurrency: default_file_concurrency(),
            retained_jobs: default_retained_jobs(),
        }
    }
}

fn default_chunk_threshold() -> usize {
    20
}

fn default_chunk_size() -> usize {
    10
}

fn default_step_delay_ms() -> u64 {
    250
}

fn default_file_concurrency() -> usize {
    4
}

fn default_retained_jobs() -> usize {
    64
}

/// Remote analysis store configuration
///
/// When no server is configured, analyses are kept in memory only.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Store server URL (e.g., `https://store.example.com`)
    pub server_url: Option<String>,

    /// Bearer token for the store
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_key: None,
            timeout_secs: default_store_timeout(),
        }
    }
}

impl StoreConfig {
    /// Check if a remote store is configured
    pub fn is_remote(&self) -> bool {
        self.server_url.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_some() && self.server_url.is_none() {
            return Err(Error::Config(
                "store.server_url is required when store.api_key is set".to_string(),
            ));
        }
        if let Some(url) = &self.server_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "store.server_url must be an http(s) URL, got {url}"
                )));
            }
        }
        Ok(())
    }
}

fn default_store_timeout() -> u64 {
    30
}

/// Quota ledger configuration
#[derive(Debug, Deserialize, Clone)]
pub struct QuotaConfig {
    /// Persist quota windows to the local SQLite ledger
    #[serde(default = "default_quota_persist")]
    pub persist: bool,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            persist: default_quota_persist(),
        }
    }
}

fn default_quota_persist() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Mirror log events to stderr
    #[serde(default)]
    pub stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stderr: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.store.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/codelens/config.toml` (~/.config/codelens/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("codelens").join("config.toml")
    }

    /// Returns the data directory path (for the quota ledger)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("codelens")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("codelens")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/codelens/quota.db` (~/.local/share/codelens/quota.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("quota.db")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("codelens.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// Lets the CLI pin path behavior before other components read these vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.providers.is_empty());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.coordinator.freshness_secs, 300);
        assert_eq!(config.coordinator.predictive_freshness_secs, 1800);
        assert_eq!(config.coordinator.max_provider_rounds, 2);
        assert_eq!(config.orchestrator.chunk_threshold, 20);
        assert_eq!(config.orchestrator.chunk_size, 10);
        assert!(config.quota.persist);
        assert!(!config.store.is_remote());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[providers.gemini]
monthly_limit = 2
model = "gemini-1.5-pro"

[retry]
max_attempts = 5
base_delay_ms = 200

[orchestrator]
chunk_size = 25

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        let gemini = &config.providers["gemini"];
        assert_eq!(gemini.monthly_limit, Some(2));
        assert_eq!(gemini.model.as_deref(), Some("gemini-1.5-pro"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.orchestrator.chunk_size, 25);
        assert_eq!(config.orchestrator.chunk_threshold, 20);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = RetryConfig::default().policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.attempt_timeout, Duration::from_secs(60));
        assert_eq!(policy.jitter, 0.0);
    }

    #[test]
    fn test_store_config_validation() {
        assert!(StoreConfig::default().validate().is_ok());

        let config = StoreConfig {
            api_key: Some("token".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StoreConfig {
            server_url: Some("ftp://store".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StoreConfig {
            server_url: Some("https://store.example.com".to_string()),
            api_key: Some("token".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert!(config.is_remote());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[coordinator]\nmax_provider_rounds = 3\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.coordinator.max_provider_rounds, 3);
    }
}
