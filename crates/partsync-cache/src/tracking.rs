//! SQLite implementation of ITrackingStore
//!
//! ## Type Mapping
//!
//! | Domain Type    | SQL Type | Strategy                                      |
//! |----------------|----------|-----------------------------------------------|
//! | PathBuf        | TEXT     | `to_string_lossy()` / `PathBuf::from`         |
//! | FileHash       | TEXT     | `.as_str()` / `FileHash::new()`               |
//! | RemoteId       | TEXT     | `.as_str()` / `RemoteId::new()`               |
//! | FolderPath     | TEXT     | `.as_str()` / `FolderPath::new()`, `''` = root |
//! | DateTime<Utc>  | TEXT     | `to_rfc3339()` / `parse_from_rfc3339()`       |

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use partsync_core::domain::{FileHash, FolderPath, RemoteId, TrackingEntry};
use partsync_core::ports::ITrackingStore;

use crate::CacheError;

/// SQLite-backed tracking table
///
/// Cloning shares the underlying pool.
#[derive(Debug, Clone)]
pub struct SqliteTrackingStore {
    pool: SqlitePool,
}

impl SqliteTrackingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Conversion helpers
// ============================================================================

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            CacheError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

fn entry_from_row(row: &SqliteRow) -> Result<TrackingEntry, CacheError> {
    let file_path: String = row.get("file_path");
    let content_hash: String = row.get("content_hash");
    let remote_id: String = row.get("remote_id");
    let folder_path: String = row.get("folder_path");
    let last_seen_at: String = row.get("last_seen_at");
    let created_at: String = row.get("created_at");

    Ok(TrackingEntry {
        file_path: PathBuf::from(file_path),
        content_hash: FileHash::new(content_hash)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?,
        remote_id: RemoteId::new(remote_id)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?,
        logical_name: row.get("logical_name"),
        folder_path: FolderPath::new(folder_path)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?,
        last_seen_at: parse_datetime(&last_seen_at)?,
        created_at: parse_datetime(&created_at)?,
    })
}

fn entries_from_rows(rows: &[SqliteRow]) -> Result<Vec<TrackingEntry>, CacheError> {
    rows.iter().map(entry_from_row).collect()
}

// ============================================================================
// ITrackingStore implementation
// ============================================================================

#[async_trait::async_trait]
impl ITrackingStore for SqliteTrackingStore {
    async fn get_by_path(&self, path: &Path) -> anyhow::Result<Option<TrackingEntry>> {
        let row = sqlx::query("SELECT * FROM tracking WHERE file_path = ?")
            .bind(path_key(path))
            .fetch_optional(&self.pool)
            .await
            .map_err(CacheError::from)?;

        match row {
            Some(ref r) => Ok(Some(entry_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_by_hash(&self, hash: &FileHash) -> anyhow::Result<Vec<TrackingEntry>> {
        let rows = sqlx::query("SELECT * FROM tracking WHERE content_hash = ? ORDER BY file_path")
            .bind(hash.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(CacheError::from)?;
        Ok(entries_from_rows(&rows)?)
    }

    async fn get_by_remote_id(&self, remote_id: &RemoteId) -> anyhow::Result<Vec<TrackingEntry>> {
        let rows = sqlx::query("SELECT * FROM tracking WHERE remote_id = ? ORDER BY file_path")
            .bind(remote_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(CacheError::from)?;
        Ok(entries_from_rows(&rows)?)
    }

    async fn upsert(&self, entry: &TrackingEntry) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tracking (
                file_path, content_hash, remote_id, logical_name,
                folder_path, last_seen_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_path) DO UPDATE SET
                content_hash = excluded.content_hash,
                remote_id = excluded.remote_id,
                logical_name = excluded.logical_name,
                folder_path = excluded.folder_path,
                last_seen_at = excluded.last_seen_at
            "#,
        )
        .bind(path_key(&entry.file_path))
        .bind(entry.content_hash.as_str())
        .bind(entry.remote_id.as_str())
        .bind(&entry.logical_name)
        .bind(entry.folder_path.as_str())
        .bind(entry.last_seen_at.to_rfc3339())
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(CacheError::from)?;

        tracing::trace!(path = %entry.file_path.display(), remote_id = %entry.remote_id, "Tracking upserted");
        Ok(())
    }

    async fn update_path(
        &self,
        old_path: &Path,
        new_path: &Path,
        folder_path: &FolderPath,
        logical_name: &str,
    ) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await.map_err(CacheError::from)?;

        if old_path != new_path {
            sqlx::query("DELETE FROM tracking WHERE file_path = ?")
                .bind(path_key(new_path))
                .execute(&mut *tx)
                .await
                .map_err(CacheError::from)?;
        }

        let result = sqlx::query(
            r#"
            UPDATE tracking
            SET file_path = ?, folder_path = ?, logical_name = ?, last_seen_at = ?
            WHERE file_path = ?
            "#,
        )
        .bind(path_key(new_path))
        .bind(folder_path.as_str())
        .bind(logical_name)
        .bind(Utc::now().to_rfc3339())
        .bind(path_key(old_path))
        .execute(&mut *tx)
        .await
        .map_err(CacheError::from)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(CacheError::from)?;
            return Ok(false);
        }

        tx.commit().await.map_err(CacheError::from)?;
        Ok(true)
    }

    async fn update_hash(&self, path: &Path, hash: &FileHash) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE tracking SET content_hash = ?, last_seen_at = ? WHERE file_path = ?",
        )
        .bind(hash.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(path_key(path))
        .execute(&self.pool)
        .await
        .map_err(CacheError::from)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, path: &Path) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM tracking WHERE file_path = ?")
            .bind(path_key(path))
            .execute(&self.pool)
            .await
            .map_err(CacheError::from)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_remote_id(&self, remote_id: &RemoteId) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM tracking WHERE remote_id = ?")
            .bind(remote_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(CacheError::from)?;

        Ok(result.rows_affected())
    }

    async fn count(&self) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tracking")
            .fetch_one(&self.pool)
            .await
            .map_err(CacheError::from)?;

        Ok(count as u64)
    }

    async fn list_all(&self) -> anyhow::Result<Vec<TrackingEntry>> {
        let rows = sqlx::query("SELECT * FROM tracking ORDER BY file_path")
            .fetch_all(&self.pool)
            .await
            .map_err(CacheError::from)?;
        Ok(entries_from_rows(&rows)?)
    }
}
