//! Shared helpers for engine tests
//!
//! [`FakePartsApi`] keeps folders and parts in memory and records every call,
//! so tests can assert on exactly which mutations the engine issued.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use partsync_api::ApiError;
use partsync_cache::{DatabasePool, SqliteTrackingStore};
use partsync_core::domain::{FileHash, RemoteId};
use partsync_core::ports::{FolderRecord, IPartsApi, ITrackingStore, NewPart, PartRecord, SignedUpload};
use partsync_sync::engine::EngineSettings;
use partsync_sync::pipeline::PipelineSettings;
use partsync_sync::scanner::hash_bytes;
use partsync_sync::SyncEngine;

pub const ROOT_NAME: &str = "Local Folder Sync";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListFolders,
    ListParts,
    CreateFolder { name: String, parent: Option<String> },
    DeleteFolders(Vec<String>),
    CreatePart { name: String, folder: String },
    UpdateContent { id: String, hash: String },
    MovePart { id: String, folder: String },
    DeletePart(String),
    SignedUrl(String),
    Upload(String),
}

impl Call {
    /// Calls that change remote state
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Call::CreateFolder { .. }
                | Call::DeleteFolders(_)
                | Call::CreatePart { .. }
                | Call::UpdateContent { .. }
                | Call::MovePart { .. }
                | Call::DeletePart(_)
        )
    }
}

#[derive(Default)]
struct State {
    folders: BTreeMap<String, FolderRecord>,
    parts: BTreeMap<String, PartRecord>,
    next_id: u64,
    calls: Vec<Call>,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:04}", self.next_id)
    }
}

fn rid(s: &str) -> RemoteId {
    RemoteId::new(s.to_string()).unwrap()
}

#[derive(Default)]
pub struct FakePartsApi {
    state: Mutex<State>,
}

impl FakePartsApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A fake that already has the sync root folder; returns its ID
    pub fn with_root() -> (Arc<Self>, String) {
        let api = Self::new();
        let root = api.add_folder(ROOT_NAME, None);
        (api, root)
    }

    pub fn add_folder(&self, name: &str, parent: Option<&str>) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.id("f");
        state.folders.insert(
            id.clone(),
            FolderRecord {
                id: rid(&id),
                name: name.into(),
                parent_id: parent.map(rid),
            },
        );
        id
    }

    pub fn add_part(
        &self,
        name: &str,
        folder: &str,
        hash: &FileHash,
        updated_at: Option<DateTime<Utc>>,
    ) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.id("p");
        state.parts.insert(
            id.clone(),
            PartRecord {
                id: rid(&id),
                name: name.into(),
                folder_id: Some(rid(folder)),
                file_hashes: vec![hash.as_str().to_string()],
                updated_at,
            },
        );
        id
    }

    pub fn part(&self, id: &str) -> Option<PartRecord> {
        self.state.lock().unwrap().parts.get(id).cloned()
    }

    pub fn parts(&self) -> Vec<PartRecord> {
        self.state.lock().unwrap().parts.values().cloned().collect()
    }

    pub fn folders(&self) -> Vec<FolderRecord> {
        self.state.lock().unwrap().folders.values().cloned().collect()
    }

    /// First folder named `name` under `parent`
    pub fn folder_named(&self, name: &str, parent: Option<&str>) -> Option<FolderRecord> {
        self.folders().into_iter().find(|f| {
            f.name == name && f.parent_id.as_ref().map(RemoteId::as_str) == parent
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl IPartsApi for FakePartsApi {
    async fn list_folders(&self) -> anyhow::Result<Vec<FolderRecord>> {
        self.record(Call::ListFolders);
        Ok(self.folders())
    }

    async fn create_folder(&self, name: &str, parent_id: Option<&RemoteId>) -> anyhow::Result<RemoteId> {
        self.record(Call::CreateFolder {
            name: name.into(),
            parent: parent_id.map(|p| p.as_str().to_string()),
        });
        let id = self.add_folder(name, parent_id.map(RemoteId::as_str));
        Ok(rid(&id))
    }

    async fn delete_folders(&self, folder_ids: &[RemoteId]) -> anyhow::Result<()> {
        let ids: Vec<String> = folder_ids.iter().map(|f| f.as_str().to_string()).collect();
        self.record(Call::DeleteFolders(ids.clone()));
        let mut state = self.state.lock().unwrap();
        for id in ids {
            state.folders.remove(&id);
        }
        Ok(())
    }

    async fn list_parts(&self) -> anyhow::Result<Vec<PartRecord>> {
        self.record(Call::ListParts);
        Ok(self.parts())
    }

    async fn create_part(&self, part: &NewPart) -> anyhow::Result<RemoteId> {
        self.record(Call::CreatePart {
            name: part.name.clone(),
            folder: part.folder_id.as_str().to_string(),
        });
        let id = self.add_part(&part.name, part.folder_id.as_str(), &part.content_hash, Some(Utc::now()));
        Ok(rid(&id))
    }

    async fn update_part_content(
        &self,
        part_id: &RemoteId,
        _file_uri: &str,
        hash: &FileHash,
    ) -> anyhow::Result<()> {
        self.record(Call::UpdateContent {
            id: part_id.as_str().to_string(),
            hash: hash.as_str().to_string(),
        });
        let mut state = self.state.lock().unwrap();
        let part = state
            .parts
            .get_mut(part_id.as_str())
            .ok_or_else(|| ApiError::NotFound(part_id.to_string()))?;
        part.file_hashes = vec![hash.as_str().to_string()];
        part.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn move_part(&self, part_id: &RemoteId, folder_id: &RemoteId) -> anyhow::Result<()> {
        self.record(Call::MovePart {
            id: part_id.as_str().to_string(),
            folder: folder_id.as_str().to_string(),
        });
        let mut state = self.state.lock().unwrap();
        let part = state
            .parts
            .get_mut(part_id.as_str())
            .ok_or_else(|| ApiError::NotFound(part_id.to_string()))?;
        part.folder_id = Some(folder_id.clone());
        Ok(())
    }

    async fn delete_part(&self, part_id: &RemoteId) -> anyhow::Result<bool> {
        self.record(Call::DeletePart(part_id.as_str().to_string()));
        Ok(self.state.lock().unwrap().parts.remove(part_id.as_str()).is_some())
    }

    async fn signed_upload_url(&self, file_name: &str) -> anyhow::Result<SignedUpload> {
        self.record(Call::SignedUrl(file_name.into()));
        Ok(SignedUpload {
            upload_url: format!("https://storage.test/upload/{file_name}"),
            path: format!("uploads/{file_name}"),
        })
    }

    async fn upload_bytes(&self, upload: &SignedUpload, _data: Vec<u8>) -> anyhow::Result<()> {
        self.record(Call::Upload(upload.path.clone()));
        Ok(())
    }
}

// ============================================================================
// Engine harness
// ============================================================================

pub struct Harness {
    pub dir: TempDir,
    pub api: Arc<FakePartsApi>,
    pub tracking: Arc<dyn ITrackingStore>,
    pub engine: SyncEngine,
    _pool: DatabasePool,
}

impl Harness {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `content` at `rel`, creating parent directories
    pub fn write(&self, rel: &str, content: &[u8]) -> PathBuf {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }
}

pub fn engine_settings(root: &Path) -> EngineSettings {
    EngineSettings {
        root: root.to_path_buf(),
        root_folder_name: ROOT_NAME.into(),
        legacy_folders: Vec::new(),
        resync_interval: Duration::from_secs(300),
        debounce: Duration::from_millis(10),
        grace_period: Duration::from_millis(150),
        max_reconcile_passes: 10,
        max_file_size_mb: 500,
    }
}

pub fn pipeline_settings() -> PipelineSettings {
    PipelineSettings {
        upload_interval: Duration::from_millis(10),
        upload_workers: 2,
        delete_interval: Duration::from_millis(10),
        stability_check: Duration::from_millis(5),
        max_upload_attempts: 3,
    }
}

pub async fn harness(api: Arc<FakePartsApi>) -> Harness {
    harness_with(api, |_| {}).await
}

pub async fn harness_with(api: Arc<FakePartsApi>, tweak: impl FnOnce(&mut EngineSettings)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let pool = DatabasePool::in_memory().await.unwrap();
    let tracking: Arc<dyn ITrackingStore> = Arc::new(SqliteTrackingStore::new(pool.pool().clone()));

    let mut settings = engine_settings(dir.path());
    tweak(&mut settings);
    let engine = SyncEngine::with_settings(
        settings,
        pipeline_settings(),
        api.clone() as Arc<dyn IPartsApi>,
        Arc::clone(&tracking),
    );

    Harness {
        dir,
        api,
        tracking,
        engine,
        _pool: pool,
    }
}

pub fn hash(content: &[u8]) -> FileHash {
    hash_bytes(content)
}
