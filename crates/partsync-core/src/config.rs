//! Configuration module for partsync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, environment overrides, validation, defaults, and a builder for
//! programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable overriding `api.base_url`
pub const ENV_API_URL: &str = "PRINTAGO_API_URL";
/// Environment variable overriding `api.api_key`
pub const ENV_API_KEY: &str = "PRINTAGO_API_KEY";
/// Environment variable overriding `api.store_id`
pub const ENV_STORE_ID: &str = "PRINTAGO_STORE_ID";
/// Environment variable overriding `sync.root`
pub const ENV_WATCH_PATH: &str = "PARTSYNC_WATCH_PATH";

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for partsync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub sync: SyncConfig,
    pub rate_limiting: RateLimitingConfig,
    pub pipelines: PipelinesConfig,
    pub state: StateConfig,
    pub logging: LoggingConfig,
}

/// Remote API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the parts API, without a trailing slash.
    pub base_url: String,
    /// API key sent as `authorization: ApiKey <key>`.
    pub api_key: String,
    /// Store identifier sent as `x-printago-storeid`.
    pub store_id: String,
    pub user_agent: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Local directory whose model files are mirrored.
    pub root: PathBuf,
    /// Name of the dedicated top-level remote folder everything lives under.
    pub root_folder_name: String,
    /// Top-level remote folders created by older versions outside the sync
    /// root. Each is indexed as the sync root itself, with folders under the
    /// real root winning on path clashes.
    pub legacy_folders: Vec<String>,
    /// Seconds between full remote rebuilds and reconciliations.
    pub resync_interval_secs: u64,
    /// Per-path debounce window for filesystem events, in milliseconds.
    pub debounce_ms: u64,
    /// Seconds to wait after a delete before acting on it.
    pub grace_period_secs: u64,
    /// `limit` query parameter for list endpoints.
    pub list_limit: u32,
    /// Upper bound on reconciliation passes per cycle.
    pub max_reconcile_passes: u32,
    /// Files larger than this (in MiB) are ignored.
    pub max_file_size_mb: u64,
}

/// Remote API rate-limiting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    /// Minimum spacing between the starts of two API calls, in milliseconds.
    pub min_interval_ms: u64,
    /// Retries after a 429 or transient failure before giving up.
    pub max_retries: u32,
    /// First backoff delay; doubled on each retry.
    pub base_backoff_ms: u64,
    /// Cap for any single backoff delay.
    pub max_backoff_secs: u64,
}

/// Execution pipeline pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelinesConfig {
    /// Milliseconds between upload dispatches.
    pub upload_interval_ms: u64,
    /// Maximum concurrent upload workers.
    pub upload_workers: u32,
    /// Milliseconds between remote deletes.
    pub delete_interval_ms: u64,
    /// Interval used when waiting for a file's size to settle.
    pub stability_check_ms: u64,
    /// Attempts before a failing upload is dropped until the next resync.
    pub max_upload_attempts: u32,
}

/// Persisted local state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// SQLite database holding the tracking table. Must be outside `sync.root`.
    pub database: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `text` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
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
    /// Typically `$XDG_CONFIG_HOME/partsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("partsync")
            .join("config.yaml")
    }

    /// Apply `PRINTAGO_*` / `PARTSYNC_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup; empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_API_URL) {
            self.api.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(key) = get(ENV_API_KEY) {
            self.api.api_key = key;
        }
        if let Some(store) = get(ENV_STORE_ID) {
            self.api.store_id = store;
        }
        if let Some(root) = get(ENV_WATCH_PATH) {
            self.sync.root = PathBuf::from(root);
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://new-api.printago.io".to_string(),
            api_key: String::new(),
            store_id: String::new(),
            user_agent: "PrintagoFolderWatch/1.0".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("3D Models"),
            root_folder_name: "Local Folder Sync".to_string(),
            legacy_folders: Vec::new(),
            resync_interval_secs: 300,
            debounce_ms: 300,
            grace_period_secs: 5,
            list_limit: 10_000,
            max_reconcile_passes: 10,
            max_file_size_mb: 500,
        }
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 500,
            max_retries: 5,
            base_backoff_ms: 1_000,
            max_backoff_secs: 60,
        }
    }
}

impl Default for PipelinesConfig {
    fn default() -> Self {
        Self {
            upload_interval_ms: 2_000,
            upload_workers: 10,
            delete_interval_ms: 5_000,
            stability_check_ms: 500,
            max_upload_attempts: 3,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            database: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("partsync")
                .join("tracking.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.debounce_ms"`.
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
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

fn positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError {
            field: field.into(),
            message: "must be greater than 0".into(),
        });
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- api ---
        if !(self.api.base_url.starts_with("http://") || self.api.base_url.starts_with("https://"))
        {
            errors.push(ValidationError {
                field: "api.base_url".into(),
                message: format!("must be an http(s) URL: '{}'", self.api.base_url),
            });
        }
        if self.api.api_key.trim().is_empty() {
            errors.push(ValidationError {
                field: "api.api_key".into(),
                message: format!("must be set (or provide {ENV_API_KEY})"),
            });
        }
        if self.api.store_id.trim().is_empty() {
            errors.push(ValidationError {
                field: "api.store_id".into(),
                message: format!("must be set (or provide {ENV_STORE_ID})"),
            });
        }
        positive(&mut errors, "api.request_timeout_secs", self.api.request_timeout_secs);

        // --- sync ---
        let root_str = self.sync.root.to_string_lossy();
        if !root_str.starts_with('~') && !self.sync.root.is_dir() {
            errors.push(ValidationError {
                field: "sync.root".into(),
                message: format!("directory does not exist: {}", self.sync.root.display()),
            });
        }
        let name = self.sync.root_folder_name.trim();
        if name.is_empty() || name.contains('/') {
            errors.push(ValidationError {
                field: "sync.root_folder_name".into(),
                message: "must be a non-empty name without '/'".into(),
            });
        }
        for legacy in &self.sync.legacy_folders {
            if legacy.trim().is_empty() || legacy.contains('/') || legacy == name {
                errors.push(ValidationError {
                    field: "sync.legacy_folders".into(),
                    message: format!("invalid legacy folder name '{legacy}'"),
                });
            }
        }
        positive(&mut errors, "sync.resync_interval_secs", self.sync.resync_interval_secs);
        positive(&mut errors, "sync.debounce_ms", self.sync.debounce_ms);
        positive(&mut errors, "sync.list_limit", u64::from(self.sync.list_limit));
        positive(
            &mut errors,
            "sync.max_reconcile_passes",
            u64::from(self.sync.max_reconcile_passes),
        );
        positive(&mut errors, "sync.max_file_size_mb", self.sync.max_file_size_mb);

        // --- rate_limiting ---
        positive(
            &mut errors,
            "rate_limiting.base_backoff_ms",
            self.rate_limiting.base_backoff_ms,
        );
        positive(
            &mut errors,
            "rate_limiting.max_backoff_secs",
            self.rate_limiting.max_backoff_secs,
        );

        // --- pipelines ---
        positive(
            &mut errors,
            "pipelines.upload_interval_ms",
            self.pipelines.upload_interval_ms,
        );
        if self.pipelines.upload_workers == 0 || self.pipelines.upload_workers > 64 {
            errors.push(ValidationError {
                field: "pipelines.upload_workers".into(),
                message: "must be in range 1..=64".into(),
            });
        }
        positive(
            &mut errors,
            "pipelines.delete_interval_ms",
            self.pipelines.delete_interval_ms,
        );
        positive(
            &mut errors,
            "pipelines.max_upload_attempts",
            u64::from(self.pipelines.max_upload_attempts),
        );

        // --- state ---
        if self.state.database.starts_with(&self.sync.root) {
            errors.push(ValidationError {
                field: "state.database".into(),
                message: format!(
                    "must not be inside sync.root ({})",
                    self.sync.root.display()
                ),
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
/// use partsync_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .sync_root(PathBuf::from("/home/user/models"))
///     .api_credentials("key", "store")
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

    // --- api ---

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api.base_url = url.into();
        self
    }

    pub fn api_credentials(mut self, api_key: impl Into<String>, store_id: impl Into<String>) -> Self {
        self.config.api.api_key = api_key.into();
        self.config.api.store_id = store_id.into();
        self
    }

    // --- sync ---

    pub fn sync_root(mut self, root: PathBuf) -> Self {
        self.config.sync.root = root;
        self
    }

    pub fn sync_root_folder_name(mut self, name: impl Into<String>) -> Self {
        self.config.sync.root_folder_name = name.into();
        self
    }

    pub fn sync_legacy_folder(mut self, name: impl Into<String>) -> Self {
        self.config.sync.legacy_folders.push(name.into());
        self
    }

    pub fn sync_debounce_ms(mut self, ms: u64) -> Self {
        self.config.sync.debounce_ms = ms;
        self
    }

    pub fn sync_grace_period_secs(mut self, secs: u64) -> Self {
        self.config.sync.grace_period_secs = secs;
        self
    }

    pub fn sync_resync_interval_secs(mut self, secs: u64) -> Self {
        self.config.sync.resync_interval_secs = secs;
        self
    }

    pub fn sync_max_reconcile_passes(mut self, n: u32) -> Self {
        self.config.sync.max_reconcile_passes = n;
        self
    }

    // --- rate_limiting ---

    pub fn rate_limiting_min_interval_ms(mut self, ms: u64) -> Self {
        self.config.rate_limiting.min_interval_ms = ms;
        self
    }

    pub fn rate_limiting_max_retries(mut self, n: u32) -> Self {
        self.config.rate_limiting.max_retries = n;
        self
    }

    // --- pipelines ---

    pub fn pipelines_upload_workers(mut self, n: u32) -> Self {
        self.config.pipelines.upload_workers = n;
        self
    }

    pub fn pipelines_stability_check_ms(mut self, ms: u64) -> Self {
        self.config.pipelines.stability_check_ms = ms;
        self
    }

    // --- state ---

    pub fn state_database(mut self, path: PathBuf) -> Self {
        self.config.state.database = path;
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
