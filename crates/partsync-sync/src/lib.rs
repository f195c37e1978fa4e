//! partsync Sync - Reconciliation engine
//!
//! Provides:
//! - Local scanning with a file-type whitelist and a content-hash cache
//! - A snapshot cache of the remote folder/part tree
//! - Fixed-point reconciliation producing a [`SyncPlan`](partsync_core::domain::SyncPlan)
//! - Upload and delete pipelines with per-key serialization
//! - A deletion grace period that absorbs delete-then-recreate saves
//!
//! ## Modules
//!
//! - [`engine`] - Orchestrates full resyncs, events and background loops
//! - [`scanner`] - Whitelisted tree walk and cached SHA-256 hashing
//! - [`watcher`] - `notify` wrapper and per-path debounce queue
//! - [`scheduler`] - Event router between the watcher and the engine
//! - [`remote_cache`] - Folder/part indexes rebuilt from the API
//! - [`reconcile`] - One reconciliation pass
//! - [`folders`] - Memoized `GetOrCreateFolder`
//! - [`pipeline`] - Upload/delete queues and workers
//! - [`grace`] - Deletion grace period
//! - [`stats`] - Engine counters

pub mod engine;
pub mod folders;
pub mod grace;
pub mod pipeline;
pub mod reconcile;
pub mod remote_cache;
pub mod scanner;
pub mod scheduler;
pub mod stats;
pub mod watcher;

use std::path::PathBuf;

use thiserror::Error;

pub use engine::SyncEngine;
pub use stats::{EngineStats, StatsSnapshot};

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred during file operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The watch root is missing or is not a directory
    #[error("Watch root unavailable: {0}")]
    RootUnavailable(PathBuf),

    /// The filesystem watcher could not be started
    #[error("Watcher failed to start: {0}")]
    WatcherFailed(String),

    /// Reconciliation hit its pass cap while the remote index kept changing
    #[error("Reconciliation did not converge after {passes} passes")]
    NotConverged {
        /// Number of passes executed before giving up
        passes: u32,
    },

    /// A remote folder could not be resolved or created
    #[error("Folder unavailable: {0}")]
    FolderUnavailable(String),

    /// A domain-level error propagated from partsync-core
    #[error("Domain error: {0}")]
    DomainError(#[from] partsync_core::domain::DomainError),
}
