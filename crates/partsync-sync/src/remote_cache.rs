//! Remote state cache
//!
//! Holds an immutable [`RemoteSnapshot`] of the folders and parts under the
//! sync root. Readers clone the `Arc`; [`RemoteCache::rebuild`] fetches both
//! listings and swaps in a new snapshot, and the fine-grained mutators
//! copy-on-write the current one so in-flight readers are never disturbed.
//!
//! ## Path reconstruction
//!
//! Remote folders only carry a parent pointer. Each folder's path is derived
//! by walking parents iteratively until the sync root or a configured legacy
//! top-level folder is reached; both have the empty path. A missing
//! parent, a cycle, or a chain ending at any other top-level folder places
//! the folder outside the sync tree, and parts inside it are ignored.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use partsync_core::domain::{FileHash, FolderPath, RemoteFolder, RemoteId, RemotePart, SyncKey};
use partsync_core::ports::{FolderRecord, IPartsApi, PartRecord};

// ============================================================================
// RemoteSnapshot
// ============================================================================

/// An immutable view of the remote tree under the sync root
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    root_id: Option<RemoteId>,
    folders: HashMap<RemoteId, RemoteFolder>,
    /// Path → folder; a root-descended folder wins over a legacy one
    folders_by_path: HashMap<FolderPath, RemoteId>,
    parts_by_key: HashMap<SyncKey, Vec<RemotePart>>,
    part_keys: HashMap<RemoteId, SyncKey>,
    /// Folders holding at least one child folder, including unindexed ones
    has_children: HashSet<RemoteId>,
    /// Folders holding parts that could not be indexed
    foreign_occupied: HashSet<RemoteId>,
    built_at: Option<DateTime<Utc>>,
}

/// Outcome of walking one folder's parent chain
enum Resolved {
    Path(FolderPath, bool),
    Outside(&'static str),
}

impl RemoteSnapshot {
    /// Builds the indexes from raw listings
    ///
    /// # Arguments
    /// * `root_name` - Name of the top-level sync root folder
    /// * `legacy` - Top-level folder names mapped as if nested under the root
    pub fn build(
        folders: Vec<FolderRecord>,
        parts: Vec<PartRecord>,
        root_name: &str,
        legacy: &[String],
    ) -> Self {
        let mut snapshot = Self {
            built_at: Some(Utc::now()),
            ..Self::default()
        };

        let records: HashMap<RemoteId, FolderRecord> =
            folders.into_iter().map(|f| (f.id.clone(), f)).collect();

        let mut roots: Vec<&FolderRecord> = records
            .values()
            .filter(|f| f.parent_id.is_none() && f.name == root_name)
            .collect();
        roots.sort_by(|a, b| a.id.cmp(&b.id));
        if roots.len() > 1 {
            warn!(
                count = roots.len(),
                chosen = %roots[0].id,
                "Multiple sync root folders found, using the first"
            );
        }
        snapshot.root_id = roots.first().map(|f| f.id.clone());

        for record in records.values() {
            if let Some(parent) = &record.parent_id {
                snapshot.has_children.insert(parent.clone());
            }
        }

        let mut memo: HashMap<RemoteId, Option<(FolderPath, bool)>> = HashMap::new();
        let mut ids: Vec<&RemoteId> = records.keys().collect();
        ids.sort();

        for id in ids {
            match resolve_path(id, &records, snapshot.root_id.as_ref(), legacy, &mut memo) {
                Resolved::Path(path, legacy_tree) => {
                    let Some(record) = records.get(id) else {
                        continue;
                    };
                    let folder = RemoteFolder {
                        id: record.id.clone(),
                        name: record.name.clone(),
                        parent_id: record.parent_id.clone(),
                        full_path: path.clone(),
                    };
                    snapshot.index_folder(folder, legacy_tree);
                }
                Resolved::Outside(reason) => {
                    debug!(folder_id = %id, reason, "Folder outside sync root");
                }
            }
        }

        for record in parts {
            snapshot.index_record(record);
        }

        snapshot
    }

    fn index_folder(&mut self, folder: RemoteFolder, legacy_tree: bool) {
        let path = folder.full_path.clone();
        let id = folder.id.clone();
        match self.folders_by_path.get(&path).cloned() {
            Some(existing) if legacy_tree => {
                debug!(path = %path, kept = %existing, legacy = %id, "Root folder shadows legacy folder");
            }
            Some(existing) if !self.is_legacy(&existing) => {
                // Two root-descended folders with one path; keep the first seen
                warn!(path = %path, kept = %existing, duplicate = %id, "Duplicate remote folder path");
            }
            _ => {
                self.folders_by_path.insert(path, id.clone());
            }
        }
        self.folders.insert(id, folder);
    }

    /// True for a folder whose chain ends at a legacy top-level folder
    fn is_legacy(&self, id: &RemoteId) -> bool {
        let mut current = self.folders.get(id);
        let mut steps = 0;
        while let Some(folder) = current {
            if Some(&folder.id) == self.root_id.as_ref() {
                return false;
            }
            match &folder.parent_id {
                Some(parent) if steps < self.folders.len() => {
                    current = self.folders.get(parent);
                    steps += 1;
                }
                _ => return true,
            }
        }
        true
    }

    fn index_record(&mut self, record: PartRecord) {
        let content_hash = record.content_hash();
        let Some(folder_id) = record.folder_id else {
            return;
        };
        let Some(folder) = self.folders.get(&folder_id) else {
            return;
        };

        let part = RemotePart {
            id: record.id,
            name: record.name,
            folder_id,
            folder_path: folder.full_path.clone(),
            content_hash,
            updated_at: record.updated_at,
        };
        match part.key() {
            Ok(_) => self.insert_part(part),
            Err(e) => {
                warn!(part_id = %part.id, name = %part.name, error = %e, "Unindexable part name");
                self.foreign_occupied.insert(part.folder_id);
            }
        }
    }

    fn insert_part(&mut self, part: RemotePart) {
        let Ok(key) = part.key() else {
            return;
        };
        self.detach_part(&part.id);
        self.part_keys.insert(part.id.clone(), key.clone());
        let bucket = self.parts_by_key.entry(key).or_default();
        bucket.push(part);
        bucket.sort_by(|a, b| a.id.cmp(&b.id));
    }

    fn detach_part(&mut self, id: &RemoteId) -> Option<RemotePart> {
        let key = self.part_keys.remove(id)?;
        let bucket = self.parts_by_key.get_mut(&key)?;
        let idx = bucket.iter().position(|p| &p.id == id)?;
        let part = bucket.remove(idx);
        if bucket.is_empty() {
            self.parts_by_key.remove(&key);
        }
        Some(part)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn root_id(&self) -> Option<&RemoteId> {
        self.root_id.as_ref()
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    /// Folder ID for a path; the empty path resolves to the sync root
    pub fn folder_id(&self, path: &FolderPath) -> Option<&RemoteId> {
        if path.is_root() {
            return self.root_id.as_ref();
        }
        self.folders_by_path.get(path)
    }

    pub fn folder(&self, id: &RemoteId) -> Option<&RemoteFolder> {
        self.folders.get(id)
    }

    pub fn folders(&self) -> impl Iterator<Item = &RemoteFolder> {
        self.folders.values()
    }

    pub fn folder_count(&self) -> usize {
        self.folders.len()
    }

    /// Every part at `key`, ordered by ID
    pub fn parts_at(&self, key: &SyncKey) -> &[RemotePart] {
        self.parts_by_key.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn part(&self, id: &RemoteId) -> Option<&RemotePart> {
        let key = self.part_keys.get(id)?;
        self.parts_at(key).iter().find(|p| &p.id == id)
    }

    pub fn contains_part(&self, id: &RemoteId) -> bool {
        self.part_keys.contains_key(id)
    }

    /// All keys that have at least one part, sorted
    pub fn keys(&self) -> Vec<&SyncKey> {
        let mut keys: Vec<&SyncKey> = self.parts_by_key.keys().collect();
        keys.sort();
        keys
    }

    pub fn parts(&self) -> impl Iterator<Item = &RemotePart> {
        self.parts_by_key.values().flatten()
    }

    pub fn part_count(&self) -> usize {
        self.part_keys.len()
    }

    /// Parts with the given name and content hash, in any folder
    pub fn find_by_name_and_hash(&self, name: &str, hash: &FileHash) -> Vec<&RemotePart> {
        let mut found: Vec<&RemotePart> = self
            .parts()
            .filter(|p| p.name == name && p.hash_matches(hash))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// Folders that could be removed without losing anything
    ///
    /// A folder qualifies when it is not top-level (the sync root or a
    /// legacy top folder), holds no parts, has no path in `keep`, and every
    /// child folder also qualifies. The result is ordered deepest-first.
    pub fn removable_folders(&self, keep: &HashSet<FolderPath>) -> Vec<RemoteFolder> {
        let occupied: HashSet<&RemoteId> = self
            .parts()
            .map(|p| &p.folder_id)
            .chain(self.foreign_occupied.iter())
            .collect();

        let mut children: HashMap<&RemoteId, Vec<&RemoteId>> = HashMap::new();
        for folder in self.folders.values() {
            if let Some(parent) = &folder.parent_id {
                children.entry(parent).or_default().push(&folder.id);
            }
        }

        // Deepest-first so every child is decided before its parent
        let mut ordered: Vec<&RemoteFolder> = self.folders.values().collect();
        ordered.sort_by(|a, b| {
            b.full_path
                .depth()
                .cmp(&a.full_path.depth())
                .then_with(|| a.full_path.cmp(&b.full_path))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut removable: HashSet<&RemoteId> = HashSet::new();
        let mut result = Vec::new();
        for folder in ordered {
            if folder.parent_id.is_none()
                || folder.is_sync_root()
                || Some(&folder.id) == self.root_id.as_ref()
            {
                continue;
            }
            if occupied.contains(&folder.id) || keep.contains(&folder.full_path) {
                continue;
            }
            let indexed_children = children.get(&folder.id).map(Vec::as_slice).unwrap_or(&[]);
            let all_children_removable = indexed_children.iter().all(|c| removable.contains(c));
            // A child we could not index still blocks removal
            let unindexed_children =
                self.has_children.contains(&folder.id) && indexed_children.is_empty();
            if all_children_removable && !unindexed_children {
                removable.insert(&folder.id);
                result.push(folder.clone());
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // Mutations (applied to a private copy by RemoteCache)
    // ------------------------------------------------------------------

    fn add_folder(&mut self, folder: RemoteFolder) {
        if folder.parent_id.is_none() && folder.full_path.is_root() {
            self.root_id = Some(folder.id.clone());
        }
        if let Some(parent) = &folder.parent_id {
            self.has_children.insert(parent.clone());
        }
        self.index_folder(folder, false);
    }

    fn drop_folders(&mut self, ids: &[RemoteId]) {
        for id in ids {
            if let Some(folder) = self.folders.remove(id) {
                if self.folders_by_path.get(&folder.full_path) == Some(id) {
                    self.folders_by_path.remove(&folder.full_path);
                }
            }
            self.has_children.remove(id);
            self.foreign_occupied.remove(id);
        }
    }

    fn move_part(&mut self, id: &RemoteId, folder_id: &RemoteId) -> Option<RemotePart> {
        let path = self.folder(folder_id).map(|f| f.full_path.clone()).or_else(|| {
            (Some(folder_id) == self.root_id.as_ref()).then(FolderPath::root)
        })?;
        let mut part = self.detach_part(id)?;
        part.folder_id = folder_id.clone();
        part.folder_path = path;
        part.updated_at = Some(Utc::now());
        self.insert_part(part.clone());
        Some(part)
    }
}

/// Walks `id`'s parent chain without recursion
fn resolve_path(
    id: &RemoteId,
    records: &HashMap<RemoteId, FolderRecord>,
    root_id: Option<&RemoteId>,
    legacy: &[String],
    memo: &mut HashMap<RemoteId, Option<(FolderPath, bool)>>,
) -> Resolved {
    let mut chain: Vec<&FolderRecord> = Vec::new();
    let mut visited: HashSet<&RemoteId> = HashSet::new();
    let mut current = id;

    // Climb until we hit something already known or a terminal folder
    let base: Option<(FolderPath, bool)> = loop {
        if let Some(known) = memo.get(current) {
            break known.clone();
        }
        if !visited.insert(current) {
            warn!(folder_id = %current, "Cycle in remote folder tree");
            break None;
        }
        let Some(record) = records.get(current) else {
            warn!(folder_id = %current, "Remote folder references a missing parent");
            break None;
        };
        if Some(&record.id) == root_id {
            break Some((FolderPath::root(), false));
        }
        match &record.parent_id {
            Some(parent) => {
                chain.push(record);
                current = parent;
            }
            None if legacy.iter().any(|l| l == &record.name) => {
                // A legacy top folder stands in for the sync root itself
                memo.insert(record.id.clone(), Some((FolderPath::root(), true)));
                break Some((FolderPath::root(), true));
            }
            None => break None,
        }
    };

    // Descend back down the chain, memoizing each level
    let mut resolved = base;
    for record in chain.into_iter().rev() {
        resolved = match resolved {
            Some((path, legacy_tree)) => match path.join(&record.name) {
                Ok(child) => Some((child, legacy_tree)),
                Err(e) => {
                    warn!(folder_id = %record.id, name = %record.name, error = %e, "Unusable folder name");
                    None
                }
            },
            None => None,
        };
        memo.insert(record.id.clone(), resolved.clone());
    }

    if root_id == Some(id) {
        memo.insert(id.clone(), Some((FolderPath::root(), false)));
        return Resolved::Path(FolderPath::root(), false);
    }
    match memo.get(id).cloned().flatten() {
        Some((path, legacy_tree)) => Resolved::Path(path, legacy_tree),
        None => Resolved::Outside("no path to sync root"),
    }
}

// ============================================================================
// RemoteCache
// ============================================================================

/// Shared owner of the current [`RemoteSnapshot`]
pub struct RemoteCache {
    api: Arc<dyn IPartsApi>,
    root_folder_name: String,
    legacy_folders: Vec<String>,
    current: RwLock<Arc<RemoteSnapshot>>,
}

impl RemoteCache {
    pub fn new(
        api: Arc<dyn IPartsApi>,
        root_folder_name: impl Into<String>,
        legacy_folders: Vec<String>,
    ) -> Self {
        Self {
            api,
            root_folder_name: root_folder_name.into(),
            legacy_folders,
            current: RwLock::new(Arc::new(RemoteSnapshot::default())),
        }
    }

    pub fn root_folder_name(&self) -> &str {
        &self.root_folder_name
    }

    pub fn legacy_folders(&self) -> &[String] {
        &self.legacy_folders
    }

    /// The current snapshot
    pub async fn snapshot(&self) -> Arc<RemoteSnapshot> {
        self.current.read().await.clone()
    }

    /// Lists folders, then parts, and atomically swaps in a fresh snapshot
    #[tracing::instrument(skip(self))]
    pub async fn rebuild(&self) -> Result<Arc<RemoteSnapshot>> {
        let folders = self
            .api
            .list_folders()
            .await
            .context("Failed to list remote folders")?;
        let parts = self
            .api
            .list_parts()
            .await
            .context("Failed to list remote parts")?;

        let snapshot = Arc::new(RemoteSnapshot::build(
            folders,
            parts,
            &self.root_folder_name,
            &self.legacy_folders,
        ));

        info!(
            folders = snapshot.folder_count(),
            parts = snapshot.part_count(),
            has_root = snapshot.root_id().is_some(),
            "Remote cache rebuilt"
        );

        *self.current.write().await = snapshot.clone();
        Ok(snapshot)
    }

    /// The current snapshot, listing the remote first if it was never built
    pub async fn ensure_built(&self) -> Result<Arc<RemoteSnapshot>> {
        let snapshot = self.snapshot().await;
        if snapshot.built_at().is_some() {
            return Ok(snapshot);
        }
        self.rebuild().await
    }

    /// Inserts or replaces a part
    pub async fn upsert_part(&self, part: RemotePart) {
        let mut guard = self.current.write().await;
        Arc::make_mut(&mut guard).insert_part(part);
    }

    pub async fn remove_part(&self, id: &RemoteId) -> Option<RemotePart> {
        let mut guard = self.current.write().await;
        Arc::make_mut(&mut guard).detach_part(id)
    }

    /// Records a folder just created remotely
    pub async fn insert_folder(&self, folder: RemoteFolder) {
        let mut guard = self.current.write().await;
        Arc::make_mut(&mut guard).add_folder(folder);
    }

    pub async fn remove_folders(&self, ids: &[RemoteId]) {
        let mut guard = self.current.write().await;
        Arc::make_mut(&mut guard).drop_folders(ids);
    }

    /// Reflects a completed folder reassignment
    ///
    /// # Returns
    /// The part as it now stands, or `None` if either ID is unknown
    pub async fn apply_move(&self, part_id: &RemoteId, folder_id: &RemoteId) -> Option<RemotePart> {
        let mut guard = self.current.write().await;
        Arc::make_mut(&mut guard).move_part(part_id, folder_id)
    }
}
