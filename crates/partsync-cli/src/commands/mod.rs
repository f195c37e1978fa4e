//! CLI subcommands and the wiring they share

pub mod check;
pub mod cleanup;
pub mod config;
pub mod status;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use partsync_api::client::ApiClient;
use partsync_api::provider::PartsApiProvider;
use partsync_api::rate_limit::{GateConfig, RequestGate};
use partsync_cache::{DatabasePool, SqliteTrackingStore};
use partsync_core::config::Config;
use partsync_core::ports::{IPartsApi, ITrackingStore};
use partsync_sync::SyncEngine;

use crate::output::{Output, OutputFormat};

/// Global options every command sees
pub struct CliContext {
    pub config_path: PathBuf,
    pub format: OutputFormat,
}

impl CliContext {
    pub fn new(config_path: Option<PathBuf>, format: OutputFormat) -> Self {
        Self {
            config_path: config_path.unwrap_or_else(Config::default_path),
            format,
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    pub fn output(&self) -> Output {
        Output::stdio(self.format)
    }

    /// Config file (or defaults) with environment overrides applied
    pub fn load_config(&self) -> Config {
        let mut config = Config::load_or_default(&self.config_path);
        config.apply_env_overrides();
        config
    }

    /// Like [`load_config`](Self::load_config), but refuses an invalid result
    pub fn load_valid_config(&self) -> Result<Config> {
        let config = self.load_config();
        let errors = config.validate();
        if !errors.is_empty() {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            anyhow::bail!("Invalid configuration: {}", messages.join("; "));
        }
        Ok(config)
    }
}

/// An engine wired to the real API and the on-disk tracking database
pub struct EngineSession {
    pub engine: SyncEngine,
    pub pool: DatabasePool,
}

impl EngineSession {
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = DatabasePool::new(&config.state.database)
            .await
            .context("Failed to open tracking database")?;

        let gate = Arc::new(RequestGate::new(GateConfig::from(&config.rate_limiting)));
        let client = ApiClient::new(&config.api, gate).context("Failed to build API client")?;
        let api: Arc<dyn IPartsApi> =
            Arc::new(PartsApiProvider::new(client, config.sync.list_limit));
        let tracking: Arc<dyn ITrackingStore> =
            Arc::new(SqliteTrackingStore::new(pool.pool().clone()));

        Ok(Self {
            engine: SyncEngine::new(config, api, tracking),
            pool,
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
