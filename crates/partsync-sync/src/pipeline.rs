//! Execution pipelines
//!
//! - **Upload**: a de-duplicated queue of local paths. A dispatcher pops one
//!   path per `upload_interval` and hands it to a worker bounded by a
//!   semaphore. Workers derive what to do from current state (tracking,
//!   remote cache) rather than from the plan that queued them, so a path
//!   queued twice or already synced is a cheap no-op.
//! - **Delete**: a queue of remote parts drained one per `delete_interval`.
//! - **Move**: not queued; [`Pipelines::move_part`] is called inline.
//!
//! Every mutation of one `(folder, name)` key happens under that key's
//! mutex, so racing events for the same file cannot create duplicates.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use partsync_api::ApiError;
use partsync_core::config::PipelinesConfig;
use partsync_core::domain::{FolderMove, RemoteId, RemotePart, SyncKey, TrackingEntry};
use partsync_core::ports::{IPartsApi, ITrackingStore, NewPart};

use crate::folders::FolderResolver;
use crate::reconcile::select_survivor;
use crate::remote_cache::RemoteCache;
use crate::scanner::{hash_bytes, Scanner};
use crate::stats::EngineStats;
use crate::watcher::is_file_stable;

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub upload_interval: Duration,
    pub upload_workers: usize,
    pub delete_interval: Duration,
    pub stability_check: Duration,
    pub max_upload_attempts: u32,
}

impl From<&PipelinesConfig> for PipelineSettings {
    fn from(config: &PipelinesConfig) -> Self {
        Self {
            upload_interval: Duration::from_millis(config.upload_interval_ms),
            upload_workers: config.upload_workers.max(1) as usize,
            delete_interval: Duration::from_millis(config.delete_interval_ms),
            stability_check: Duration::from_millis(config.stability_check_ms),
            max_upload_attempts: config.max_upload_attempts.max(1),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&PipelinesConfig::default())
    }
}

// ============================================================================
// Per-key locks
// ============================================================================

/// Lazily created mutex per sync key, kept for the process lifetime
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: DashMap<SyncKey, Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &SyncKey) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

// ============================================================================
// Queues
// ============================================================================

#[derive(Debug, Default)]
struct UploadQueueInner {
    order: VecDeque<PathBuf>,
    queued: HashSet<PathBuf>,
    attempts: HashMap<PathBuf, u32>,
}

/// FIFO of local paths; a path already waiting is not added twice
#[derive(Debug, Default)]
pub struct UploadQueue {
    inner: Mutex<UploadQueueInner>,
}

impl UploadQueue {
    /// Returns `false` if the path was already queued
    pub async fn push(&self, path: PathBuf) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.queued.insert(path.clone()) {
            return false;
        }
        inner.order.push_back(path);
        true
    }

    pub async fn pop(&self) -> Option<PathBuf> {
        let mut inner = self.inner.lock().await;
        let path = inner.order.pop_front()?;
        inner.queued.remove(&path);
        Some(path)
    }

    /// Counts a failed attempt and requeues unless `max` is reached
    ///
    /// # Returns
    /// The attempt count if requeued, `None` if the path was given up on
    pub async fn retry(&self, path: PathBuf, max: u32) -> Option<u32> {
        let mut inner = self.inner.lock().await;
        let attempts = inner.attempts.entry(path.clone()).or_insert(0);
        *attempts += 1;
        let count = *attempts;
        if count >= max {
            inner.attempts.remove(&path);
            return None;
        }
        if inner.queued.insert(path.clone()) {
            inner.order.push_back(path);
        }
        Some(count)
    }

    pub async fn forget_attempts(&self, path: &Path) {
        self.inner.lock().await.attempts.remove(path);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.order.len()
    }
}

/// FIFO of remote parts to delete, de-duplicated by ID
#[derive(Debug, Default)]
pub struct DeleteQueue {
    inner: Mutex<(VecDeque<RemotePart>, HashSet<RemoteId>)>,
}

impl DeleteQueue {
    pub async fn push(&self, part: RemotePart) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.1.insert(part.id.clone()) {
            return false;
        }
        inner.0.push_back(part);
        true
    }

    pub async fn pop(&self) -> Option<RemotePart> {
        let mut inner = self.inner.lock().await;
        let part = inner.0.pop_front()?;
        inner.1.remove(&part.id);
        Some(part)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.0.len()
    }
}

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Created(RemoteId),
    Updated(RemoteId),
    /// Remote content already matched; only tracking was refreshed
    AlreadyCurrent(RemoteId),
    /// File vanished or is no longer a candidate
    Gone,
    /// File size was still changing
    Unstable,
}

/// True when a failure is worth retrying
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<ApiError>()
            .is_some_and(ApiError::is_transient)
            || cause.downcast_ref::<std::io::Error>().is_some()
    })
}

// ============================================================================
// Pipelines
// ============================================================================

pub struct Pipelines {
    api: Arc<dyn IPartsApi>,
    tracking: Arc<dyn ITrackingStore>,
    cache: Arc<RemoteCache>,
    folders: Arc<FolderResolver>,
    scanner: Scanner,
    stats: Arc<EngineStats>,
    settings: PipelineSettings,
    key_locks: KeyLocks,
    uploads: UploadQueue,
    deletes: DeleteQueue,
    upload_slots: Arc<Semaphore>,
}

impl Pipelines {
    pub fn new(
        api: Arc<dyn IPartsApi>,
        tracking: Arc<dyn ITrackingStore>,
        cache: Arc<RemoteCache>,
        folders: Arc<FolderResolver>,
        scanner: Scanner,
        stats: Arc<EngineStats>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            api,
            tracking,
            cache,
            folders,
            scanner,
            stats,
            settings,
            key_locks: KeyLocks::new(),
            uploads: UploadQueue::default(),
            deletes: DeleteQueue::default(),
            upload_slots: Arc::new(Semaphore::new(settings.upload_workers)),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn key_locks(&self) -> &KeyLocks {
        &self.key_locks
    }

    pub async fn enqueue_upload(&self, path: PathBuf) {
        if self.uploads.push(path.clone()).await {
            debug!(path = %path.display(), "Upload queued");
            self.stats.record_upload_queued();
        }
    }

    pub async fn enqueue_delete(&self, part: RemotePart) {
        let id = part.id.clone();
        if self.deletes.push(part).await {
            debug!(remote_id = %id, "Delete queued");
            self.stats.record_delete_queued();
        }
    }

    pub async fn pending_uploads(&self) -> usize {
        self.uploads.len().await
    }

    pub async fn pending_deletes(&self) -> usize {
        self.deletes.len().await
    }

    // ------------------------------------------------------------------
    // Upload
    // ------------------------------------------------------------------

    /// Uploads one path and records the result
    ///
    /// Failures are logged; transient ones requeue the path until the
    /// attempt limit.
    pub async fn process_upload(&self, path: PathBuf) {
        match self.upload_one(&path).await {
            Ok(UploadOutcome::Unstable) => {
                debug!(path = %path.display(), "File still changing, requeueing");
                if self
                    .uploads
                    .retry(path.clone(), self.settings.max_upload_attempts)
                    .await
                    .is_none()
                {
                    warn!(path = %path.display(), "File never stabilized, leaving for next resync");
                    self.stats.record_upload_failed();
                }
            }
            Ok(outcome) => {
                self.uploads.forget_attempts(&path).await;
                match &outcome {
                    UploadOutcome::Created(id) | UploadOutcome::Updated(id) => {
                        info!(path = %path.display(), remote_id = %id, outcome = ?outcome, "Upload complete");
                        self.stats.record_upload_completed();
                    }
                    other => debug!(path = %path.display(), outcome = ?other, "Upload skipped"),
                }
            }
            Err(e) if is_transient(&e) => {
                match self
                    .uploads
                    .retry(path.clone(), self.settings.max_upload_attempts)
                    .await
                {
                    Some(attempt) => {
                        warn!(path = %path.display(), attempt, error = %e, "Upload failed, requeued");
                    }
                    None => {
                        warn!(path = %path.display(), error = %e, "Upload failed, giving up until next resync");
                        self.stats.record_upload_failed();
                    }
                }
            }
            Err(e) => {
                self.uploads.forget_attempts(&path).await;
                warn!(path = %path.display(), error = %format!("{e:#}"), "Upload failed");
                self.stats.record_upload_failed();
            }
        }
    }

    /// One upload worker run
    #[tracing::instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn upload_one(&self, path: &Path) -> Result<UploadOutcome> {
        if !is_file_stable(path, self.settings.stability_check).await {
            return Ok(if tokio::fs::try_exists(path).await.unwrap_or(false) {
                UploadOutcome::Unstable
            } else {
                UploadOutcome::Gone
            });
        }

        let Some(local) = self.scanner.describe(path).await? else {
            return Ok(UploadOutcome::Gone);
        };
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let hash = hash_bytes(&data);
        self.scanner.hasher().remember(&local, hash.clone());

        let key = local.key()?;
        let _guard = self.key_locks.lock(&key).await;

        // Re-check against current state now that we hold the key
        let snapshot = self.cache.ensure_built().await?;
        let tracked = self.tracking.get_by_path(path).await?;
        let target: Option<RemotePart> = match tracked
            .as_ref()
            .and_then(|e| snapshot.part(&e.remote_id))
        {
            Some(part) => Some(part.clone()),
            None => {
                // Skip parts that back another file, such as one renamed
                // within this folder
                let mut candidates = Vec::new();
                for part in snapshot.parts_at(&key) {
                    if !self.backs_other_file(&part.id, path).await? {
                        candidates.push(part.clone());
                    }
                }
                select_survivor(&candidates, Some(&hash)).cloned()
            }
        };

        let entry = |remote_id: RemoteId| {
            TrackingEntry::new(
                path.to_path_buf(),
                hash.clone(),
                remote_id,
                local.logical_name.clone(),
                local.folder_path.clone(),
            )
        };

        if let Some(part) = target.as_ref().filter(|p| p.hash_matches(&hash)) {
            self.tracking.upsert(&entry(part.id.clone())).await?;
            return Ok(UploadOutcome::AlreadyCurrent(part.id.clone()));
        }

        let folder_id = match &target {
            Some(part) => part.folder_id.clone(),
            None => self
                .folders
                .get_or_create(&local.folder_path)
                .await
                .with_context(|| format!("No destination folder for {}", local.folder_path))?,
        };

        let signed = self.api.signed_upload_url(&local.file_name).await?;
        self.api.upload_bytes(&signed, data).await?;

        let outcome = match target {
            Some(mut part) => {
                self.api
                    .update_part_content(&part.id, &signed.path, &hash)
                    .await?;
                part.content_hash = Some(hash.clone());
                part.updated_at = Some(Utc::now());
                let id = part.id.clone();
                self.cache.upsert_part(part).await;
                UploadOutcome::Updated(id)
            }
            None => {
                let new_part = NewPart {
                    name: local.logical_name.clone(),
                    part_type: local.part_type,
                    file_uri: signed.path.clone(),
                    content_hash: hash.clone(),
                    folder_id: folder_id.clone(),
                };
                let id = self.api.create_part(&new_part).await?;
                self.cache
                    .upsert_part(RemotePart {
                        id: id.clone(),
                        name: local.logical_name.clone(),
                        folder_id,
                        folder_path: local.folder_path.clone(),
                        content_hash: Some(hash.clone()),
                        updated_at: Some(Utc::now()),
                    })
                    .await;
                UploadOutcome::Created(id)
            }
        };

        let remote_id = match &outcome {
            UploadOutcome::Created(id) | UploadOutcome::Updated(id) => id.clone(),
            _ => return Ok(outcome),
        };
        self.tracking.upsert(&entry(remote_id)).await?;
        Ok(outcome)
    }

    /// Whether a file on disk other than `path` is tracked against `id`
    async fn backs_other_file(&self, id: &RemoteId, path: &Path) -> Result<bool> {
        for owner in self.tracking.get_by_remote_id(id).await? {
            if owner.file_path != path && tokio::fs::try_exists(&owner.file_path).await.unwrap_or(true) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Dispatches one queued path per tick until cancelled
    pub async fn run_upload_dispatcher(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            interval_ms = self.settings.upload_interval.as_millis() as u64,
            workers = self.settings.upload_workers,
            "Upload dispatcher starting"
        );
        let mut ticker = tokio::time::interval(self.settings.upload_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(path) = self.uploads.pop().await else {
                        continue;
                    };
                    let permit = tokio::select! {
                        _ = cancel.cancelled() => break,
                        permit = self.upload_slots.clone().acquire_owned() => match permit {
                            Ok(p) => p,
                            Err(_) => break,
                        },
                    };
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        let _permit = permit;
                        this.process_upload(path).await;
                    });
                }
            }
        }
        info!("Upload dispatcher stopped");
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Deletes one remote part; a part that is already gone counts as done
    ///
    /// # Returns
    /// `false` when the delete was dropped because a local file on disk is
    /// tracked against the part by now
    #[tracing::instrument(skip(self, part), fields(remote_id = %part.id))]
    pub async fn delete_one(&self, part: &RemotePart) -> Result<bool> {
        let key = part.key()?;
        let _guard = self.key_locks.lock(&key).await;

        // An upload may have claimed the part while the delete was queued
        for owner in self.tracking.get_by_remote_id(&part.id).await? {
            if tokio::fs::try_exists(&owner.file_path).await.unwrap_or(true) {
                info!(key = %key, path = %owner.file_path.display(), "Part tracked by a local file again, delete dropped");
                return Ok(false);
            }
        }

        let existed = self.api.delete_part(&part.id).await?;
        if !existed {
            debug!("Part already gone remotely");
        }
        let purged = self.tracking.delete_by_remote_id(&part.id).await?;
        self.cache.remove_part(&part.id).await;
        info!(key = %key, purged, "Remote part deleted");
        Ok(true)
    }

    pub async fn process_delete(&self, part: RemotePart) {
        match self.delete_one(&part).await {
            Ok(true) => self.stats.record_delete_completed(),
            Ok(false) => {}
            Err(e) => {
                warn!(remote_id = %part.id, error = %format!("{e:#}"), "Delete failed, leaving for next resync");
                self.stats.record_delete_failed();
            }
        }
    }

    /// Deletes one queued part per tick until cancelled
    pub async fn run_delete_dispatcher(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            interval_ms = self.settings.delete_interval.as_millis() as u64,
            "Delete dispatcher starting"
        );
        let mut ticker = tokio::time::interval(self.settings.delete_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(part) = self.deletes.pop().await {
                        self.process_delete(part).await;
                    }
                }
            }
        }
        info!("Delete dispatcher stopped");
    }

    // ------------------------------------------------------------------
    // Move
    // ------------------------------------------------------------------

    /// Reassigns a part's folder, creating the destination if needed
    #[tracing::instrument(skip(self, mv), fields(remote_id = %mv.remote_id, to = %mv.to))]
    pub async fn move_part(&self, mv: &FolderMove) -> Result<()> {
        let key = SyncKey::new(mv.from.clone(), mv.name.clone())?;
        let _guard = self.key_locks.lock(&key).await;

        let folder_id = self
            .folders
            .get_or_create(&mv.to)
            .await
            .with_context(|| format!("No destination folder for {}", mv.to))?;
        self.api.move_part(&mv.remote_id, &folder_id).await?;
        self.cache.apply_move(&mv.remote_id, &folder_id).await;
        self.stats.record_move();
        info!(from = %mv.from, "Part moved");
        Ok(())
    }

    /// Drains both queues immediately, ignoring the dispatch cadence
    ///
    /// Used by one-shot runs; the daemon relies on the dispatchers.
    pub async fn drain(&self) {
        while let Some(path) = self.uploads.pop().await {
            self.process_upload(path).await;
        }
        while let Some(part) = self.deletes.pop().await {
            self.process_delete(part).await;
        }
    }
}
