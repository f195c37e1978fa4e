//! PartsApiProvider - IPartsApi implementation over HTTP
//!
//! Wraps the [`ApiClient`] and maps the wire format to the port-level
//! records in `partsync_core::ports`.
//!
//! ## Design Notes
//!
//! - List endpoints answer with a bare JSON array; some deployments wrap it
//!   as `{"data": [...]}`. Both are accepted.
//! - Records with IDs that fail validation are skipped with a warning rather
//!   than failing the whole listing.
//! - Only folders of type `part` are returned.

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use partsync_core::domain::newtypes::{FileHash, RemoteId};
use partsync_core::ports::parts_api::{FolderRecord, IPartsApi, NewPart, PartRecord, SignedUpload};

use crate::client::ApiClient;
use crate::ApiError;

/// Description attached to every part this tool creates
const PART_DESCRIPTION: &str = "Auto-uploaded from folder watch";

/// Folder type used for part folders
const PART_FOLDER_TYPE: &str = "part";

// ============================================================================
// Wire types
// ============================================================================

/// A list response: bare array or `{ "data": [...] }`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListBody<T> {
    Bare(Vec<T>),
    Wrapped { data: Vec<T> },
}

impl<T> ListBody<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Bare(items) | Self::Wrapped { data: items } => items,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FolderDto {
    id: String,
    name: String,
    parent_id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartDto {
    id: String,
    name: String,
    folder_id: Option<String>,
    file_hashes: Option<Vec<String>>,
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedDto {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedUrlsDto {
    signed_urls: Vec<SignedUrlDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedUrlDto {
    upload_url: String,
    path: String,
}

fn parse_id(raw: String, what: &str) -> Option<RemoteId> {
    match RemoteId::new(raw) {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(what, error = %e, "Skipping record with invalid ID");
            None
        }
    }
}

fn folder_from_dto(dto: FolderDto) -> Option<FolderRecord> {
    if dto
        .kind
        .as_deref()
        .is_some_and(|k| k != PART_FOLDER_TYPE)
    {
        return None;
    }
    let id = parse_id(dto.id, "folder")?;
    let parent_id = dto.parent_id.and_then(|p| parse_id(p, "folder parent"));
    Some(FolderRecord {
        id,
        name: dto.name,
        parent_id,
    })
}

fn part_from_dto(dto: PartDto) -> Option<PartRecord> {
    let id = parse_id(dto.id, "part")?;
    let folder_id = dto.folder_id.and_then(|f| parse_id(f, "part folder"));
    let updated_at = dto.updated_at.as_deref().and_then(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .ok()
    });
    Some(PartRecord {
        id,
        name: dto.name,
        folder_id,
        file_hashes: dto.file_hashes.unwrap_or_default(),
        updated_at,
    })
}

fn created_id(dto: CreatedDto) -> Result<RemoteId> {
    RemoteId::new(dto.id)
        .map_err(|e| ApiError::InvalidResponse(format!("created record has bad id: {e}")).into())
}

// ============================================================================
// PartsApiProvider
// ============================================================================

/// [`IPartsApi`] backed by the live HTTP API
#[derive(Debug, Clone)]
pub struct PartsApiProvider {
    client: ApiClient,
    list_limit: u32,
}

impl PartsApiProvider {
    pub fn new(client: ApiClient, list_limit: u32) -> Self {
        Self { client, list_limit }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }
}

#[async_trait::async_trait]
impl IPartsApi for PartsApiProvider {
    async fn list_folders(&self) -> Result<Vec<FolderRecord>> {
        let path = format!("/v1/folders?limit={}", self.list_limit);
        let body: ListBody<FolderDto> = self.client.get_json(&path).await?;
        let folders: Vec<_> = body.into_vec().into_iter().filter_map(folder_from_dto).collect();
        debug!(count = folders.len(), "Listed folders");
        Ok(folders)
    }

    async fn create_folder(&self, name: &str, parent_id: Option<&RemoteId>) -> Result<RemoteId> {
        let body = json!({
            "name": name,
            "type": PART_FOLDER_TYPE,
            "parentId": parent_id.map(RemoteId::as_str),
        });
        let created: CreatedDto = self.client.send_json(Method::POST, "/v1/folders", &body).await?;
        created_id(created)
    }

    async fn delete_folders(&self, folder_ids: &[RemoteId]) -> Result<()> {
        if folder_ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<&str> = folder_ids.iter().map(RemoteId::as_str).collect();
        let body = json!({ "folderIds": ids, "type": PART_FOLDER_TYPE });
        self.client
            .send(Method::DELETE, "/v1/folders/delete", Some(&body))
            .await?;
        Ok(())
    }

    async fn list_parts(&self) -> Result<Vec<PartRecord>> {
        let path = format!("/v1/parts?limit={}", self.list_limit);
        let body: ListBody<PartDto> = self.client.get_json(&path).await?;
        let parts: Vec<_> = body.into_vec().into_iter().filter_map(part_from_dto).collect();
        debug!(count = parts.len(), "Listed parts");
        Ok(parts)
    }

    async fn create_part(&self, part: &NewPart) -> Result<RemoteId> {
        let body = json!({
            "name": part.name,
            "type": part.part_type.as_api_str(),
            "description": PART_DESCRIPTION,
            "fileUris": [part.file_uri],
            "fileHashes": [part.content_hash.as_str()],
            "parameters": [],
            "printTags": {},
            "overriddenProcessProfileId": null,
            "folderId": part.folder_id.as_str(),
        });
        let created: CreatedDto = self.client.send_json(Method::POST, "/v1/parts", &body).await?;
        created_id(created)
    }

    async fn update_part_content(
        &self,
        part_id: &RemoteId,
        file_uri: &str,
        content_hash: &FileHash,
    ) -> Result<()> {
        let body = json!({
            "fileUris": [file_uri],
            "fileHashes": [content_hash.as_str()],
        });
        let path = format!("/v1/parts/{}", part_id.as_str());
        self.client.send(Method::PATCH, &path, Some(&body)).await?;
        Ok(())
    }

    async fn move_part(&self, part_id: &RemoteId, folder_id: &RemoteId) -> Result<()> {
        let body = json!({ "folderId": folder_id.as_str() });
        let path = format!("/v1/parts/{}", part_id.as_str());
        self.client.send(Method::PATCH, &path, Some(&body)).await?;
        Ok(())
    }

    async fn delete_part(&self, part_id: &RemoteId) -> Result<bool> {
        let path = format!("/v1/parts/{}", part_id.as_str());
        match self.client.send(Method::DELETE, &path, None).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => {
                debug!(part_id = %part_id, "Part already deleted");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn signed_upload_url(&self, file_name: &str) -> Result<SignedUpload> {
        let body = json!({ "filenames": [file_name] });
        let reply: SignedUrlsDto = self
            .client
            .send_json(Method::POST, "/v1/storage/signed-upload-urls", &body)
            .await?;
        let first = reply.signed_urls.into_iter().next().ok_or_else(|| {
            ApiError::InvalidResponse("signed-upload-urls returned no entries".into())
        })?;
        Ok(SignedUpload {
            upload_url: first.upload_url,
            path: first.path,
        })
    }

    async fn upload_bytes(&self, upload: &SignedUpload, data: Vec<u8>) -> Result<()> {
        self.client.put_signed(&upload.upload_url, data).await?;
        Ok(())
    }
}
