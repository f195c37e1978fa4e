//! Tracking store port (driven/secondary port)
//!
//! Persistent `filePath -> (hash, remoteId, ...)` table. This is the only
//! engine state with cross-session durability.
//!
//! ## Design Notes
//!
//! - All operations are local and never touch the network.
//! - Implementations must be safe to call from concurrent pipeline workers.
//! - Hash and remote-ID lookups return every match; copies of one file share
//!   a hash, and a stale row may briefly share a remote ID with a fresh one.

use std::path::Path;

use crate::domain::{FileHash, FolderPath, RemoteId, TrackingEntry};

#[async_trait::async_trait]
pub trait ITrackingStore: Send + Sync {
    /// Entry for an absolute local path
    async fn get_by_path(&self, path: &Path) -> anyhow::Result<Option<TrackingEntry>>;

    /// Entries whose recorded content hash equals `hash`
    async fn get_by_hash(&self, hash: &FileHash) -> anyhow::Result<Vec<TrackingEntry>>;

    /// Entries pointing at `remote_id`
    async fn get_by_remote_id(&self, remote_id: &RemoteId) -> anyhow::Result<Vec<TrackingEntry>>;

    /// Insert or replace the entry keyed by `entry.file_path`
    async fn upsert(&self, entry: &TrackingEntry) -> anyhow::Result<()>;

    /// Re-key an entry to a new path, keeping its remote ID and hash
    ///
    /// Any entry already stored at `new_path` is replaced.
    ///
    /// # Returns
    /// `false` if no entry existed at `old_path`
    async fn update_path(
        &self,
        old_path: &Path,
        new_path: &Path,
        folder_path: &FolderPath,
        logical_name: &str,
    ) -> anyhow::Result<bool>;

    /// Refresh the content hash, keeping the path and remote ID
    ///
    /// # Returns
    /// `false` if no entry existed at `path`
    async fn update_hash(&self, path: &Path, hash: &FileHash) -> anyhow::Result<bool>;

    /// Remove the entry at `path`
    async fn delete(&self, path: &Path) -> anyhow::Result<bool>;

    /// Remove every entry pointing at `remote_id`, returning how many went
    async fn delete_by_remote_id(&self, remote_id: &RemoteId) -> anyhow::Result<u64>;

    async fn count(&self) -> anyhow::Result<u64>;

    async fn list_all(&self) -> anyhow::Result<Vec<TrackingEntry>>;
}
