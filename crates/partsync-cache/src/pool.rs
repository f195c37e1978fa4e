//! Tracking database connections
//!
//! [`DatabasePool`] opens the SQLite file that holds the tracking table.
//! Two modes exist:
//!
//! - **Writable** ([`DatabasePool::new`], [`DatabasePool::open`]): creates the
//!   file and its directory, applies the tracking migration, and checks the
//!   resulting table layout. Used by the daemon and one-shot commands.
//! - **Read-only** ([`DatabasePool::open_read_only`]): never creates or
//!   migrates anything; a missing file or a foreign table is an error. Used
//!   for inspection while the daemon may be writing.
//!
//! Every mode verifies the columns the tracking store reads, so a database
//! left by an incompatible build fails at open instead of on first query.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::{debug, info};

use crate::CacheError;

const TRACKING_MIGRATION: &str = include_str!("migrations/20260501_tracking.sql");

/// Columns the tracking store selects and writes
const TRACKING_COLUMNS: &[&str] = &[
    "file_path",
    "content_hash",
    "remote_id",
    "logical_name",
    "folder_path",
    "last_seen_at",
    "created_at",
];

/// Indexes backing hash and remote-ID lookups
const TRACKING_INDEXES: &[&str] = &["idx_tracking_content_hash", "idx_tracking_remote_id"];

/// Connection settings for the tracking database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Upload workers, the delete dispatcher and resyncs share the pool
    pub max_connections: u32,
    /// How long a writer waits on a locked database
    pub busy_timeout: Duration,
    pub read_only: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
            read_only: false,
        }
    }
}

impl PoolOptions {
    /// Settings for inspecting a database another process may be writing
    pub fn read_only() -> Self {
        Self {
            max_connections: 1,
            read_only: true,
            ..Self::default()
        }
    }
}

/// Connection pool over the tracking database
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens (creating if needed) the tracking database at `db_path`
    ///
    /// # Errors
    /// See [`DatabasePool::open`].
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        Self::open(db_path, PoolOptions::default()).await
    }

    /// Opens an existing tracking database without creating or migrating it
    ///
    /// # Errors
    /// See [`DatabasePool::open`].
    pub async fn open_read_only(db_path: &Path) -> Result<Self, CacheError> {
        Self::open(db_path, PoolOptions::read_only()).await
    }

    /// Opens the tracking database with explicit settings
    ///
    /// Writable pools use WAL journaling with `synchronous = NORMAL`; a
    /// crash may lose the last few tracking writes, which the next resync
    /// rebuilds by adoption.
    ///
    /// # Errors
    /// - [`CacheError::ConnectionFailed`] if the directory or file cannot be
    ///   created or opened (a missing file in read-only mode lands here)
    /// - [`CacheError::MigrationFailed`] if the tracking migration fails
    /// - [`CacheError::SchemaMismatch`] if the table lacks expected columns
    pub async fn open(db_path: &Path, options: PoolOptions) -> Result<Self, CacheError> {
        if !options.read_only {
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CacheError::ConnectionFailed(format!(
                        "Failed to create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let mut connect = SqliteConnectOptions::new()
            .filename(db_path)
            .read_only(options.read_only)
            .create_if_missing(!options.read_only)
            .busy_timeout(options.busy_timeout);
        if !options.read_only {
            connect = connect
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect_with(connect)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Failed to open tracking database at {}: {e}",
                    db_path.display()
                ))
            })?;

        if !options.read_only {
            migrate(&pool).await?;
        }
        verify_schema(&pool).await?;

        info!(
            path = %db_path.display(),
            read_only = options.read_only,
            "Tracking database opened"
        );
        Ok(Self { pool })
    }

    /// A private in-memory tracking database
    ///
    /// SQLite memory databases are per connection, so the pool holds
    /// exactly one.
    ///
    /// # Errors
    /// Same as [`DatabasePool::open`] minus the file cases.
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("Failed to create in-memory database: {e}"))
            })?;

        migrate(&pool).await?;
        verify_schema(&pool).await?;
        debug!("In-memory tracking database ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes every connection; WAL contents are checkpointed by SQLite
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Applies the tracking migration; every statement is idempotent
async fn migrate(pool: &SqlitePool) -> Result<(), CacheError> {
    sqlx::raw_sql(TRACKING_MIGRATION)
        .execute(pool)
        .await
        .map_err(|e| CacheError::MigrationFailed(format!("Tracking migration failed: {e}")))?;
    debug!("Tracking migration applied");
    Ok(())
}

/// Checks the tracking table has every column and index the store relies on
async fn verify_schema(pool: &SqlitePool) -> Result<(), CacheError> {
    let columns: Vec<String> =
        sqlx::query_scalar("SELECT name FROM pragma_table_info('tracking')")
            .fetch_all(pool)
            .await?;
    if columns.is_empty() {
        return Err(CacheError::SchemaMismatch("no tracking table".into()));
    }
    let missing: Vec<&str> = TRACKING_COLUMNS
        .iter()
        .copied()
        .filter(|c| !columns.iter().any(|have| have == c))
        .collect();
    if !missing.is_empty() {
        return Err(CacheError::SchemaMismatch(format!(
            "tracking table is missing columns: {}",
            missing.join(", ")
        )));
    }

    let indexes: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'tracking'",
    )
    .fetch_all(pool)
    .await?;
    for index in TRACKING_INDEXES {
        if !indexes.iter().any(|have| have == index) {
            // Lookups still work, only slower
            debug!(index, "Tracking index missing");
        }
    }
    Ok(())
}
