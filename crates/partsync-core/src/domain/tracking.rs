//! Identity tracking entries
//!
//! A [`TrackingEntry`] is the durable record that a given local file *is* a
//! given remote part. It survives restarts, and it is what lets a rename or
//! move keep the same remote identity.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{FileHash, FolderPath, RemoteId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEntry {
    /// Absolute local path, the primary key
    pub file_path: PathBuf,
    pub content_hash: FileHash,
    pub remote_id: RemoteId,
    pub logical_name: String,
    pub folder_path: FolderPath,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TrackingEntry {
    /// New entry stamped with the current time
    #[must_use]
    pub fn new(
        file_path: PathBuf,
        content_hash: FileHash,
        remote_id: RemoteId,
        logical_name: String,
        folder_path: FolderPath,
    ) -> Self {
        let now = Utc::now();
        Self {
            file_path,
            content_hash,
            remote_id,
            logical_name,
            folder_path,
            last_seen_at: now,
            created_at: now,
        }
    }
}
