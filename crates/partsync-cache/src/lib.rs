//! partsync Cache - Local identity persistence
//!
//! SQLite-backed tracking table mapping each local file path to the remote
//! part it is synchronized with.
//!
//! ## Architecture
//!
//! This crate implements the `ITrackingStore` port from `partsync-core`
//! using SQLite as the storage backend. It is a driven (secondary) adapter
//! in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteTrackingStore`] - `ITrackingStore` implementation
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use partsync_cache::{DatabasePool, SqliteTrackingStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/partsync/tracking.db")).await?;
//! let store = SqliteTrackingStore::new(pool.pool().clone());
//! // Use store as ITrackingStore...
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod tracking;

pub use pool::{DatabasePool, PoolOptions};
pub use tracking::SqliteTrackingStore;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// The database holds a tracking table this build cannot use
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A stored value could not be converted back to a domain type
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}
