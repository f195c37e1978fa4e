//! Remote parts and folders as indexed by the engine
//!
//! These are the engine's view of remote records after folder paths have
//! been reconstructed relative to the sync root.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{FileHash, FolderPath, RemoteId, SyncKey};

/// A remote part located under the sync root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePart {
    pub id: RemoteId,
    pub name: String,
    pub folder_id: RemoteId,
    pub folder_path: FolderPath,
    /// First entry of the remote `fileHashes` array, if any
    pub content_hash: Option<FileHash>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RemotePart {
    /// # Errors
    /// Returns error if the remote name is unusable as a key
    pub fn key(&self) -> Result<SyncKey, DomainError> {
        SyncKey::new(self.folder_path.clone(), self.name.clone())
    }

    #[must_use]
    pub fn hash_matches(&self, hash: &FileHash) -> bool {
        self.content_hash.as_ref() == Some(hash)
    }
}

/// A remote folder with its reconstructed path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub id: RemoteId,
    pub name: String,
    pub parent_id: Option<RemoteId>,
    /// Path relative to the sync root; the root folder itself has the empty path
    pub full_path: FolderPath,
}

impl RemoteFolder {
    #[must_use]
    pub fn is_sync_root(&self) -> bool {
        self.full_path.is_root()
    }
}
