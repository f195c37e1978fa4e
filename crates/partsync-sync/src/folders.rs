//! Remote folder resolution
//!
//! [`FolderResolver::get_or_create`] maps a relative folder path to a remote
//! folder ID, creating the sync root and any missing segments on the way.
//! Results are memoized, and all creation happens under a single lock so two
//! workers racing on the same new folder cannot both create it.

use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use partsync_core::domain::{FolderPath, RemoteFolder, RemoteId};
use partsync_core::ports::IPartsApi;

use crate::remote_cache::RemoteCache;
use crate::stats::EngineStats;

pub struct FolderResolver {
    api: Arc<dyn IPartsApi>,
    cache: Arc<RemoteCache>,
    stats: Arc<EngineStats>,
    memo: DashMap<FolderPath, RemoteId>,
    creation_lock: Mutex<()>,
}

impl FolderResolver {
    pub fn new(api: Arc<dyn IPartsApi>, cache: Arc<RemoteCache>, stats: Arc<EngineStats>) -> Self {
        Self {
            api,
            cache,
            stats,
            memo: DashMap::new(),
            creation_lock: Mutex::new(()),
        }
    }

    /// Resolves `path` to a folder ID, creating whatever is missing
    ///
    /// The empty path resolves to the sync root folder.
    ///
    /// # Errors
    /// Returns an error if a create call fails; segments created before the
    /// failure stay memoized.
    pub async fn get_or_create(&self, path: &FolderPath) -> Result<RemoteId> {
        if let Some(id) = self.memo.get(path) {
            return Ok(id.clone());
        }

        let _guard = self.creation_lock.lock().await;

        // Another worker may have finished while we waited
        if let Some(id) = self.memo.get(path) {
            return Ok(id.clone());
        }

        let mut parent_id = self.ensure_root().await?;
        let mut current = FolderPath::root();

        for segment in path.segments() {
            current = current.join(segment)?;

            if let Some(id) = self.memo.get(&current) {
                parent_id = id.clone();
                continue;
            }

            let snapshot = self.cache.snapshot().await;
            let id = match snapshot.folder_id(&current) {
                Some(existing) => existing.clone(),
                None => {
                    let created = self
                        .api
                        .create_folder(segment, Some(&parent_id))
                        .await
                        .with_context(|| format!("Failed to create remote folder '{current}'"))?;
                    info!(path = %current, folder_id = %created, "Created remote folder");
                    self.stats.record_folder_created();
                    self.cache
                        .insert_folder(RemoteFolder {
                            id: created.clone(),
                            name: segment.to_string(),
                            parent_id: Some(parent_id.clone()),
                            full_path: current.clone(),
                        })
                        .await;
                    created
                }
            };

            self.memo.insert(current.clone(), id.clone());
            parent_id = id;
        }

        Ok(parent_id)
    }

    /// The sync root folder ID, creating the folder if it does not exist
    async fn ensure_root(&self) -> Result<RemoteId> {
        let root = FolderPath::root();
        if let Some(id) = self.memo.get(&root) {
            return Ok(id.clone());
        }

        let snapshot = self.cache.ensure_built().await?;
        let id = match snapshot.root_id() {
            Some(id) => id.clone(),
            None => {
                let name = self.cache.root_folder_name();
                let created = self
                    .api
                    .create_folder(name, None)
                    .await
                    .with_context(|| format!("Failed to create sync root folder '{name}'"))?;
                info!(name, folder_id = %created, "Created sync root folder");
                self.stats.record_folder_created();
                self.cache
                    .insert_folder(RemoteFolder {
                        id: created.clone(),
                        name: name.to_string(),
                        parent_id: None,
                        full_path: root.clone(),
                    })
                    .await;
                created
            }
        };

        self.memo.insert(root, id.clone());
        Ok(id)
    }

    /// Drops every memoized ID; called after folders are deleted or the
    /// remote cache is rebuilt
    pub fn reset(&self) {
        debug!(entries = self.memo.len(), "Resetting folder memo");
        self.memo.clear();
    }
}
