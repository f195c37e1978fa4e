//! Parts API port (driven/secondary port)
//!
//! This module defines the interface to the remote parts/folders service.
//! The HTTP implementation lives in `partsync-api`; engine tests use an
//! in-memory fake.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because transport errors are adapter-specific.
//!   Callers that need to classify a failure downcast to the adapter's error.
//! - Record structs are port-level DTOs, not domain entities; the remote
//!   cache maps them to `RemotePart`/`RemoteFolder` once paths are known.
//! - Every method except [`IPartsApi::upload_bytes`] counts against the
//!   remote rate limit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::newtypes::{FileHash, RemoteId};
use crate::domain::PartType;

// ============================================================================
// Records
// ============================================================================

/// A folder as returned by the list endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub id: RemoteId,
    pub name: String,
    /// `None` for top-level folders
    pub parent_id: Option<RemoteId>,
}

/// A part as returned by the list endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    pub id: RemoteId,
    pub name: String,
    pub folder_id: Option<RemoteId>,
    /// Raw `fileHashes` values; only the first is meaningful
    pub file_hashes: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PartRecord {
    /// The first file hash, if present and well-formed
    #[must_use]
    pub fn content_hash(&self) -> Option<FileHash> {
        self.file_hashes
            .first()
            .and_then(|h| FileHash::new(h.clone()).ok())
    }
}

/// Everything needed to create a part from an uploaded file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPart {
    pub name: String,
    pub part_type: PartType,
    /// Storage path returned by the signed-upload call
    pub file_uri: String,
    pub content_hash: FileHash,
    /// Destination folder; files at the watch root go in the sync-root folder
    pub folder_id: RemoteId,
}

/// A pre-authorized upload location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUpload {
    /// URL to `PUT` the raw bytes to
    pub upload_url: String,
    /// Storage path to reference from the part's `fileUris`
    pub path: String,
}

// ============================================================================
// IPartsApi trait
// ============================================================================

/// Port trait for the remote parts/folders service
#[async_trait::async_trait]
pub trait IPartsApi: Send + Sync {
    /// Lists every folder visible to the store
    async fn list_folders(&self) -> anyhow::Result<Vec<FolderRecord>>;

    /// Creates a part folder and returns its ID
    ///
    /// # Arguments
    /// * `name` - Folder name (a single path segment)
    /// * `parent_id` - Parent folder, or `None` for a top-level folder
    async fn create_folder(&self, name: &str, parent_id: Option<&RemoteId>)
        -> anyhow::Result<RemoteId>;

    /// Deletes several folders in one bulk call
    async fn delete_folders(&self, folder_ids: &[RemoteId]) -> anyhow::Result<()>;

    /// Lists every part visible to the store
    async fn list_parts(&self) -> anyhow::Result<Vec<PartRecord>>;

    /// Creates a part referencing an already-uploaded file
    async fn create_part(&self, part: &NewPart) -> anyhow::Result<RemoteId>;

    /// Replaces only the content reference of an existing part
    ///
    /// Sends `fileUris` and `fileHashes` and nothing else, so every other
    /// remote attribute of the part is preserved.
    async fn update_part_content(
        &self,
        part_id: &RemoteId,
        file_uri: &str,
        content_hash: &FileHash,
    ) -> anyhow::Result<()>;

    /// Reassigns a part to another folder without touching its content
    async fn move_part(&self, part_id: &RemoteId, folder_id: &RemoteId) -> anyhow::Result<()>;

    /// Deletes a part
    ///
    /// # Returns
    /// `false` if the part was already gone
    async fn delete_part(&self, part_id: &RemoteId) -> anyhow::Result<bool>;

    /// Requests a signed upload location for a file name
    async fn signed_upload_url(&self, file_name: &str) -> anyhow::Result<SignedUpload>;

    /// Transfers raw bytes to a signed upload location
    ///
    /// This goes to the storage host, not the API, and carries no API
    /// credentials.
    async fn upload_bytes(&self, upload: &SignedUpload, data: Vec<u8>) -> anyhow::Result<()>;
}
