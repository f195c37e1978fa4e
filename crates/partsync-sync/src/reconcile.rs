//! One reconciliation pass
//!
//! [`reconcile_pass`] compares the local index, the remote snapshot and the
//! tracking store and produces a [`SyncPlan`]. Tracking-store corrections
//! that need no network call (path updates for moves, adoption of existing
//! remote parts, purging stale entries) are applied during the pass.
//!
//! The pass runs in this order:
//!
//! 1. Prune duplicate parts at keys that have a local file.
//! 2. Resolve files tracked at their current path.
//! 3. Resolve remaining files by content hash (moves, then adoption).
//! 4. Mark remote parts with no local counterpart for deletion. Keys of
//!    unreadable files and of paths held by a grace window are skipped.
//! 5. Plan creates and updates for whatever is left.
//!
//! Empty-folder cleanup ([`cleanup_empty_folders`]) runs after the pass; the
//! engine repeats the pass until cleanup removes nothing.

use std::collections::{btree_map::Entry, BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use partsync_core::domain::{
    FileHash, FolderMove, FolderPath, LocalFile, PlanConflict, PlannedUpdate, RemoteFolder,
    RemoteId, RemotePart, SyncKey, SyncPlan, TrackingEntry,
};
use partsync_core::ports::{IPartsApi, ITrackingStore};

use crate::remote_cache::RemoteSnapshot;
use crate::scanner::{ScanResult, Scanner};

// ============================================================================
// LocalIndex
// ============================================================================

/// Scanned files with their content hashes
#[derive(Debug, Clone, Default)]
pub struct LocalIndex {
    /// Hashed files, sorted by absolute path
    pub files: Vec<LocalFile>,
    /// Files present on disk whose content could not be read this cycle;
    /// their keys are protected from deletion
    pub unreadable: Vec<LocalFile>,
    /// Local directories relative to the root
    pub dirs: BTreeSet<FolderPath>,
    /// Tracked paths missing from disk but inside a delete grace window;
    /// their parts and tracking entries are kept until the window closes
    pub held: HashSet<PathBuf>,
}

impl LocalIndex {
    /// Hashes every scanned file (cached by size and mtime)
    pub async fn from_scan(scan: ScanResult, scanner: &Scanner) -> Self {
        let mut index = Self {
            dirs: scan.dirs,
            ..Self::default()
        };
        for file in scan.files {
            match scanner.hasher().hash(&file).await {
                Ok(hash) => index.files.push(file.with_hash(hash)),
                Err(e) => {
                    warn!(path = %file.absolute_path.display(), error = %e, "Cannot hash file, skipping this cycle");
                    index.unreadable.push(file);
                }
            }
        }
        index
    }

    /// Builds an index from files whose hashes are already known
    pub fn from_files(files: Vec<LocalFile>, dirs: BTreeSet<FolderPath>) -> Self {
        let (files, unreadable): (Vec<_>, Vec<_>) =
            files.into_iter().partition(|f| f.content_hash.is_some());
        Self {
            files,
            unreadable,
            dirs,
            held: HashSet::new(),
        }
    }

    /// Marks paths as held by a pending grace window
    pub fn with_held(mut self, held: impl IntoIterator<Item = PathBuf>) -> Self {
        self.held.extend(held);
        self
    }

    fn all_paths(&self) -> HashSet<&Path> {
        self.files
            .iter()
            .chain(self.unreadable.iter())
            .map(|f| f.absolute_path.as_path())
            .collect()
    }
}

// ============================================================================
// Survivor selection
// ============================================================================

/// Picks the part to keep among duplicates sharing one key
///
/// A part whose hash equals `local_hash` wins regardless of timestamps;
/// otherwise the most recently updated part wins. Remaining ties go to the
/// smallest ID.
pub fn select_survivor<'a>(
    parts: &'a [RemotePart],
    local_hash: Option<&FileHash>,
) -> Option<&'a RemotePart> {
    let by_recency = |a: &&RemotePart, b: &&RemotePart| {
        a.updated_at
            .cmp(&b.updated_at)
            .then_with(|| b.id.cmp(&a.id))
    };

    if let Some(hash) = local_hash {
        let matching = parts.iter().filter(|p| p.hash_matches(hash)).max_by(by_recency);
        if matching.is_some() {
            return matching;
        }
    }
    parts.iter().max_by(by_recency)
}

// ============================================================================
// Pass
// ============================================================================

enum Resolution {
    Resolved,
    Unresolved,
    Conflicted,
}

struct Pass<'a> {
    snapshot: &'a RemoteSnapshot,
    tracking: &'a dyn ITrackingStore,
    local_paths: HashSet<&'a Path>,
    held: &'a HashSet<PathBuf>,
    local_keys: HashSet<SyncKey>,
    doomed: HashSet<RemoteId>,
    claims: HashMap<RemoteId, PathBuf>,
    plan: SyncPlan,
}

impl<'a> Pass<'a> {
    /// Whether a tracked path still backs its part this pass
    fn is_live(&self, path: &Path) -> bool {
        self.local_paths.contains(path) || self.held.contains(path)
    }

    /// A part that exists remotely and is not scheduled for deletion
    fn live_part(&self, id: &RemoteId) -> Option<&'a RemotePart> {
        if self.doomed.contains(id) {
            return None;
        }
        self.snapshot.part(id)
    }

    fn conflict(&mut self, file: &LocalFile, remote_id: Option<RemoteId>, reason: String) {
        warn!(path = %file.absolute_path.display(), reason = %reason, "Reconciliation conflict");
        self.plan.conflicts.push(PlanConflict {
            local_path: file.absolute_path.clone(),
            remote_id,
            reason,
        });
    }

    /// Binds `id` to `file` for this pass
    ///
    /// Returns `false` and records a conflict if another file holds it.
    fn claim(&mut self, id: &RemoteId, file: &LocalFile) -> bool {
        match self.claims.get(id) {
            Some(owner) if owner != &file.absolute_path => {
                let reason = format!("remote part already claimed by {}", owner.display());
                self.conflict(file, Some(id.clone()), reason);
                false
            }
            _ => {
                self.claims.insert(id.clone(), file.absolute_path.clone());
                true
            }
        }
    }

    fn plan_move(&mut self, part: &RemotePart, file: &LocalFile) {
        if part.folder_path != file.folder_path {
            debug!(remote_id = %part.id, from = %part.folder_path, to = %file.folder_path, "Planning folder move");
            self.plan.folder_moves.push(FolderMove {
                remote_id: part.id.clone(),
                name: part.name.clone(),
                from: part.folder_path.clone(),
                to: file.folder_path.clone(),
            });
        }
    }

    fn plan_content(&mut self, part: &RemotePart, file: &LocalFile, hash: &FileHash) {
        if !part.hash_matches(hash) {
            self.plan.updates.push(PlannedUpdate {
                local: file.clone(),
                part: part.clone(),
            });
        }
    }

    /// Whether a local file other than `path` is tracked against `id`
    async fn owned_elsewhere(&self, id: &RemoteId, path: &Path) -> Result<bool> {
        Ok(self
            .tracking
            .get_by_remote_id(id)
            .await?
            .iter()
            .any(|e| e.file_path != path && self.is_live(&e.file_path)))
    }

    /// Duplicate parts at keys that have a local file
    ///
    /// A part tracked by another local file is not a duplicate: a rename
    /// within one folder keeps the remote name, so a new file can share the
    /// key of a part that still backs the renamed one.
    async fn prune_duplicates(&mut self, by_key: &BTreeMap<SyncKey, &LocalFile>) -> Result<()> {
        let snapshot = self.snapshot;
        for (key, file) in by_key {
            let parts = snapshot.parts_at(key);
            if parts.len() < 2 {
                continue;
            }
            let mut candidates = Vec::with_capacity(parts.len());
            for part in parts {
                if !self.owned_elsewhere(&part.id, &file.absolute_path).await? {
                    candidates.push(part.clone());
                }
            }
            if candidates.len() < 2 {
                continue;
            }
            let Some(survivor) = select_survivor(&candidates, file.content_hash.as_ref()) else {
                continue;
            };
            info!(key = %key, count = candidates.len(), survivor = %survivor.id, "Pruning duplicate remote parts");
            for part in candidates.iter().filter(|p| p.id != survivor.id) {
                self.doomed.insert(part.id.clone());
                self.plan.deletes.push(part.clone());
            }
        }
        Ok(())
    }

    /// Files with a tracking entry at their own path
    async fn resolve_tracked(&mut self, file: &LocalFile, hash: &FileHash) -> Result<Resolution> {
        let Some(entry) = self.tracking.get_by_path(&file.absolute_path).await? else {
            return Ok(Resolution::Unresolved);
        };

        let Some(part) = self.live_part(&entry.remote_id) else {
            info!(
                path = %file.absolute_path.display(),
                remote_id = %entry.remote_id,
                "Tracked part no longer exists remotely, reclassifying file"
            );
            self.tracking.delete(&file.absolute_path).await?;
            return Ok(Resolution::Unresolved);
        };

        if !self.claim(&part.id, file) {
            return Ok(Resolution::Conflicted);
        }

        if part.hash_matches(hash) {
            if &entry.content_hash != hash {
                self.tracking.update_hash(&file.absolute_path, hash).await?;
            }
        } else {
            self.plan_content(part, file, hash);
        }
        self.plan_move(part, file);
        Ok(Resolution::Resolved)
    }

    /// Untracked files: moves from a vanished path, then adoption
    async fn resolve_by_hash(&mut self, file: &LocalFile, hash: &FileHash) -> Result<Resolution> {
        // Moves: same bytes tracked under a path that no longer exists
        for entry in self.tracking.get_by_hash(hash).await? {
            if entry.file_path == file.absolute_path
                || self.local_paths.contains(entry.file_path.as_path())
            {
                continue;
            }
            let Some(part) = self.live_part(&entry.remote_id) else {
                self.tracking.delete(&entry.file_path).await?;
                continue;
            };
            if !self.claim(&part.id, file) {
                return Ok(Resolution::Conflicted);
            }

            self.tracking
                .update_path(
                    &entry.file_path,
                    &file.absolute_path,
                    &file.folder_path,
                    &file.logical_name,
                )
                .await?;
            info!(
                from = %entry.file_path.display(),
                to = %file.absolute_path.display(),
                remote_id = %part.id,
                "Detected local move"
            );
            self.plan_move(part, file);
            self.plan_content(part, file, hash);
            return Ok(Resolution::Resolved);
        }

        // Adoption: a part at this key already has these bytes
        let key = file.key()?;
        let adoptable = self
            .snapshot
            .parts_at(&key)
            .iter()
            .find(|p| !self.doomed.contains(&p.id) && p.hash_matches(hash));
        if let Some(part) = adoptable {
            if !self.claim(&part.id, file) {
                return Ok(Resolution::Conflicted);
            }
            self.adopt(part, file, hash).await?;
            return Ok(Resolution::Resolved);
        }

        // Folder-level move: same name and bytes in another folder whose
        // key has no local file of its own
        for part in self.snapshot.find_by_name_and_hash(&file.logical_name, hash) {
            if part.folder_path == file.folder_path
                || self.doomed.contains(&part.id)
                || self.claims.contains_key(&part.id)
            {
                continue;
            }
            if part.key().is_ok_and(|k| self.local_keys.contains(&k)) {
                continue;
            }
            let owners = self.tracking.get_by_remote_id(&part.id).await?;
            if owners.iter().any(|e| self.is_live(&e.file_path)) {
                continue;
            }
            if !self.claim(&part.id, file) {
                return Ok(Resolution::Conflicted);
            }
            self.adopt(part, file, hash).await?;
            self.plan_move(part, file);
            return Ok(Resolution::Resolved);
        }

        Ok(Resolution::Unresolved)
    }

    async fn adopt(&self, part: &RemotePart, file: &LocalFile, hash: &FileHash) -> Result<()> {
        info!(path = %file.absolute_path.display(), remote_id = %part.id, "Adopting existing remote part");
        self.tracking
            .upsert(&TrackingEntry::new(
                file.absolute_path.clone(),
                hash.clone(),
                part.id.clone(),
                file.logical_name.clone(),
                file.folder_path.clone(),
            ))
            .await
    }

    /// Remote parts whose key has no local file
    async fn plan_deletions(&mut self, protected: &HashSet<SyncKey>) -> Result<()> {
        for key in self.snapshot.keys() {
            if self.local_keys.contains(key) || protected.contains(key) {
                continue;
            }
            for part in self.snapshot.parts_at(key) {
                if self.doomed.contains(&part.id) || self.claims.contains_key(&part.id) {
                    continue;
                }

                let owners = self.tracking.get_by_remote_id(&part.id).await?;
                let (live, stale): (Vec<_>, Vec<_>) = owners
                    .into_iter()
                    .partition(|e| self.is_live(&e.file_path));
                if !live.is_empty() {
                    debug!(remote_id = %part.id, "Retaining part still referenced by a local file");
                    continue;
                }
                for entry in stale {
                    self.tracking.delete(&entry.file_path).await?;
                }

                self.doomed.insert(part.id.clone());
                self.plan.deletes.push(part.clone());
            }
        }
        Ok(())
    }

    /// Creates, or updates of an untracked part at the same key
    ///
    /// Parts backing another local file are skipped, so the file gets a part
    /// of its own instead of a conflict.
    async fn plan_remaining(&mut self, file: &LocalFile) -> Result<()> {
        let key = file.key()?;
        let snapshot = self.snapshot;
        let mut existing = None;
        for part in snapshot.parts_at(&key) {
            if self.doomed.contains(&part.id) {
                continue;
            }
            let claimed_elsewhere = self
                .claims
                .get(&part.id)
                .is_some_and(|owner| owner != &file.absolute_path);
            if claimed_elsewhere || self.owned_elsewhere(&part.id, &file.absolute_path).await? {
                debug!(key = %key, remote_id = %part.id, "Part at key backs another file");
                continue;
            }
            existing = Some(part);
            break;
        }

        match existing {
            Some(part) => {
                if self.claim(&part.id, file) {
                    self.plan.updates.push(PlannedUpdate {
                        local: file.clone(),
                        part: part.clone(),
                    });
                }
            }
            None => self.plan.creates.push(file.clone()),
        }
        Ok(())
    }
}

/// Runs one reconciliation pass
///
/// # Errors
/// Returns an error if the tracking store fails; nothing from a failed pass
/// should be executed.
pub async fn reconcile_pass(
    local: &LocalIndex,
    snapshot: &RemoteSnapshot,
    tracking: &dyn ITrackingStore,
) -> Result<SyncPlan> {
    let mut pass = Pass {
        snapshot,
        tracking,
        local_paths: local.all_paths(),
        held: &local.held,
        local_keys: HashSet::new(),
        doomed: HashSet::new(),
        claims: HashMap::new(),
        plan: SyncPlan::new(),
    };

    // Local key collisions: first path in sorted order keeps the key
    let mut by_key: BTreeMap<SyncKey, &LocalFile> = BTreeMap::new();
    let mut collisions = Vec::new();
    for file in &local.files {
        let key = match file.key() {
            Ok(k) => k,
            Err(e) => {
                warn!(path = %file.absolute_path.display(), error = %e, "Unusable local name");
                continue;
            }
        };
        match by_key.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(file);
            }
            Entry::Occupied(slot) => collisions.push((file, slot.get().absolute_path.clone())),
        }
    }
    for (file, winner) in collisions {
        let reason = format!("key also used by {}", winner.display());
        pass.conflict(file, None, reason);
    }
    pass.local_keys = by_key.keys().cloned().collect();

    let mut protected: HashSet<SyncKey> = local
        .unreadable
        .iter()
        .filter_map(|f| f.key().ok())
        .collect();
    for path in &local.held {
        if let Some(entry) = tracking.get_by_path(path).await? {
            if let Ok(key) = SyncKey::new(entry.folder_path, entry.logical_name) {
                protected.insert(key);
            }
        }
    }

    pass.prune_duplicates(&by_key).await?;

    let mut pending = Vec::new();
    for file in by_key.values() {
        let Some(hash) = file.content_hash.as_ref() else {
            continue;
        };
        if let Resolution::Unresolved = pass.resolve_tracked(file, hash).await? {
            pending.push((*file, hash));
        }
    }

    let mut remaining = Vec::new();
    for (file, hash) in pending {
        if let Resolution::Unresolved = pass.resolve_by_hash(file, hash).await? {
            remaining.push(file);
        }
    }

    pass.plan_deletions(&protected).await?;

    for file in remaining {
        pass.plan_remaining(file).await?;
    }

    debug!(summary = %pass.plan.summary(), "Reconciliation pass complete");
    Ok(pass.plan)
}

// ============================================================================
// Empty-folder cleanup
// ============================================================================

/// Folder paths that must survive cleanup: every local directory, every
/// destination the plan still needs, and all their ancestors
pub fn folders_to_keep(local: &LocalIndex, plan: &SyncPlan) -> HashSet<FolderPath> {
    let destinations = plan
        .creates
        .iter()
        .map(|f| &f.folder_path)
        .chain(plan.updates.iter().map(|u| &u.local.folder_path))
        .chain(plan.folder_moves.iter().map(|m| &m.to))
        .chain(local.dirs.iter());

    let mut keep = HashSet::new();
    for path in destinations {
        let mut current = Some(path.clone());
        while let Some(p) = current {
            if !keep.insert(p.clone()) {
                break;
            }
            current = p.parent();
        }
    }
    keep
}

/// Deletes empty remote folders with no local directory, deepest-first, in
/// a single bulk call
///
/// # Returns
/// The folders deleted (or that would be deleted when `dry_run` is set)
pub async fn cleanup_empty_folders(
    api: &dyn IPartsApi,
    snapshot: &RemoteSnapshot,
    keep: &HashSet<FolderPath>,
    dry_run: bool,
) -> Result<Vec<RemoteFolder>> {
    let removable = snapshot.removable_folders(keep);
    if removable.is_empty() || dry_run {
        return Ok(removable);
    }

    let ids: Vec<RemoteId> = removable.iter().map(|f| f.id.clone()).collect();
    info!(count = ids.len(), "Deleting empty remote folders");
    for folder in &removable {
        debug!(path = %folder.full_path, folder_id = %folder.id, "Empty folder");
    }
    api.delete_folders(&ids)
        .await
        .context("Failed to delete empty remote folders")?;
    Ok(removable)
}
