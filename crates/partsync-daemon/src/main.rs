//! partsync Daemon - Background synchronization service
//!
//! This binary runs as a user service and handles:
//! - Watching the local models folder
//! - Periodic full resyncs against the parts API
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon loads and validates the configuration, opens the tracking
//! database, wires the HTTP adapter into a [`SyncEngine`] and starts it.
//! Every background loop shares one `CancellationToken` that is triggered
//! on receipt of SIGTERM or SIGINT.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use partsync_api::client::ApiClient;
use partsync_api::provider::PartsApiProvider;
use partsync_api::rate_limit::{GateConfig, RequestGate};
use partsync_cache::{DatabasePool, SqliteTrackingStore};
use partsync_core::config::{Config, LoggingConfig};
use partsync_core::ports::{IPartsApi, ITrackingStore};
use partsync_sync::SyncEngine;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable pointing at an alternative config file
const ENV_CONFIG_PATH: &str = "PARTSYNC_CONFIG";

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the engine and the resources it borrows from the process
struct DaemonService {
    config: Config,
    /// Tracking database; closed on shutdown
    db_pool: DatabasePool,
    engine: Arc<SyncEngine>,
    /// Token for signalling graceful shutdown to all async tasks
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Opens the database and builds the engine
    async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let db_path = &config.state.database;
        let db_pool = DatabasePool::new(db_path)
            .await
            .context("Failed to open tracking database")?;
        info!(database = %db_path.display(), "Tracking database opened");

        let gate = Arc::new(RequestGate::new(GateConfig::from(&config.rate_limiting)));
        let client = ApiClient::new(&config.api, gate).context("Failed to build API client")?;
        let api: Arc<dyn IPartsApi> =
            Arc::new(PartsApiProvider::new(client, config.sync.list_limit));
        let tracking: Arc<dyn ITrackingStore> =
            Arc::new(SqliteTrackingStore::new(db_pool.pool().clone()));

        let engine = Arc::new(SyncEngine::new(&config, api, tracking));

        Ok(Self {
            config,
            db_pool,
            engine,
            shutdown,
        })
    }

    /// Starts the engine and waits for the shutdown signal
    async fn run(&self) -> Result<()> {
        info!(
            root = %self.config.sync.root.display(),
            api = %self.config.api.base_url,
            resync_interval_secs = self.config.sync.resync_interval_secs,
            "Starting sync engine"
        );

        let handle = Arc::clone(&self.engine)
            .start(self.shutdown.clone())
            .await
            .context("Failed to start sync engine")?;

        self.shutdown.cancelled().await;
        info!("Shutdown signal received, stopping background tasks");
        handle.join().await;

        let stats = self.engine.stats();
        info!(
            uploads_completed = stats.uploads_completed,
            uploads_failed = stats.uploads_failed,
            deletes_completed = stats.deletes_completed,
            moves = stats.moves,
            conflicts = stats.conflicts,
            "Final engine counters"
        );

        self.db_pool.close().await;
        Ok(())
    }
}

// ============================================================================
// Configuration and logging
// ============================================================================

fn config_path() -> PathBuf {
    std::env::var_os(ENV_CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path)
}

/// `RUST_LOG` wins over the configured level
fn env_filter(logging: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = env_filter(logging);
    if logging.format.eq_ignore_ascii_case("json") {
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

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let loaded = Config::load(&path);
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => Config::default(),
    };
    config.apply_env_overrides();

    init_tracing(&config.logging);
    info!("partsync daemon starting (partsyncd)");
    match loaded {
        Ok(_) => info!(config_path = %path.display(), "Loaded configuration"),
        Err(e) => warn!(config_path = %path.display(), error = %e, "Using default configuration"),
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for err in &errors {
            error!(field = %err.field, "{}", err.message);
        }
        anyhow::bail!("Invalid configuration ({} errors)", errors.len());
    }

    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token.clone()).await?;

    let result = service.run().await;

    match &result {
        Ok(()) => info!("partsync daemon shut down gracefully"),
        Err(e) => error!(error = %format!("{e:#}"), "partsync daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
