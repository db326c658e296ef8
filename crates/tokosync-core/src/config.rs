//! Configuration module for Tokosync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Collection, DomainError};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for Tokosync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub push_remote: PushRemoteConfig,
    pub pull_remote: PullRemoteConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between pull passes.
    pub pull_interval_secs: u64,
    /// Seconds after a restore during which remote snapshots are ignored.
    pub restore_protection_secs: u64,
    /// Maximum duplicate deletes issued for one snapshot.
    pub dedup_delete_limit: usize,
    /// Collections the pull channel polls. `None` polls every collection
    /// the catalog binds to a pull table.
    pub pull_collections: Option<Vec<String>>,
}

/// Streaming (push) remote settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PushRemoteConfig {
    /// Base URL of the tree store. Empty disables the push channel.
    pub base_url: String,
    /// Token sent as the `auth` query parameter.
    pub auth_token: Option<String>,
}

/// Query-only (pull) remote settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PullRemoteConfig {
    /// Base URL of the table store. Empty disables the pull channel.
    pub base_url: String,
    /// API key sent with every request.
    pub api_key: Option<String>,
}

/// Local store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the SQLite database.
    pub database: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `pretty` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    ///
    /// Missing sections and keys take their default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/tokosync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("tokosync")
            .join("config.yaml")
    }

    /// Interval between pull passes.
    pub fn pull_interval(&self) -> Duration {
        Duration::from_secs(self.sync.pull_interval_secs)
    }

    /// Length of the post-restore protection window.
    pub fn restore_window(&self) -> Duration {
        Duration::from_secs(self.sync.restore_protection_secs)
    }

    /// Parses `sync.pull_collections`.
    ///
    /// # Errors
    /// Returns [`DomainError::UnknownCollection`] for the first unknown name.
    pub fn pull_collection_set(&self) -> Result<Option<Vec<Collection>>, DomainError> {
        self.sync
            .pull_collections
            .as_ref()
            .map(|names| {
                names
                    .iter()
                    .map(|n| n.parse::<Collection>())
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()
    }

    /// Returns true if the push channel has an endpoint.
    pub fn push_enabled(&self) -> bool {
        !self.push_remote.base_url.trim().is_empty()
    }

    /// Returns true if the pull channel has an endpoint.
    pub fn pull_enabled(&self) -> bool {
        !self.pull_remote.base_url.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pull_interval_secs: 60,
            restore_protection_secs: 300,
            dedup_delete_limit: 100,
            pull_collections: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("tokosync")
                .join("tokosync.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.pull_interval_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["pretty", "json"];

fn check_url(errors: &mut Vec<ValidationError>, field: &str, url: &str) {
    let url = url.trim();
    if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
        errors.push(ValidationError {
            field: field.into(),
            message: format!("must be an http(s) URL, got '{url}'"),
        });
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.pull_interval_secs == 0 {
            errors.push(ValidationError {
                field: "sync.pull_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.dedup_delete_limit == 0 {
            errors.push(ValidationError {
                field: "sync.dedup_delete_limit".into(),
                message: "must be greater than 0".into(),
            });
        }
        if let Err(e) = self.pull_collection_set() {
            errors.push(ValidationError {
                field: "sync.pull_collections".into(),
                message: e.to_string(),
            });
        }

        // --- remotes ---
        check_url(&mut errors, "push_remote.base_url", &self.push_remote.base_url);
        check_url(&mut errors, "pull_remote.base_url", &self.pull_remote.base_url);

        // --- store ---
        if self.store.database.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "store.database".into(),
                message: "must not be empty".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use tokosync_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .push_base_url("https://shop-default-rtdb.example.com")
///     .sync_pull_interval_secs(30)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_pull_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.pull_interval_secs = seconds;
        self
    }

    pub fn sync_restore_protection_secs(mut self, seconds: u64) -> Self {
        self.config.sync.restore_protection_secs = seconds;
        self
    }

    pub fn sync_dedup_delete_limit(mut self, limit: usize) -> Self {
        self.config.sync.dedup_delete_limit = limit;
        self
    }

    pub fn sync_pull_collections<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.sync.pull_collections = Some(names.into_iter().map(Into::into).collect());
        self
    }

    // --- remotes ---

    pub fn push_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.push_remote.base_url = url.into();
        self
    }

    pub fn push_auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.push_remote.auth_token = Some(token.into());
        self
    }

    pub fn pull_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.pull_remote.base_url = url.into();
        self
    }

    pub fn pull_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.pull_remote.api_key = Some(key.into());
        self
    }

    // --- store ---

    pub fn store_database(mut self, path: PathBuf) -> Self {
        self.config.store.database = path;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
