//! Sync engine
//!
//! The [`SyncEngine`] owns every engine service and drives them:
//!
//! 1. **Full resync**: scan the tree, then repeat rebuild → reconcile →
//!    empty-folder cleanup until cleanup deletes nothing (bounded by
//!    `sync.max_reconcile_passes`). The final plan's moves run inline; its
//!    creates, updates and deletes are queued on the pipelines.
//! 2. **Events**: settled watcher events arrive through the
//!    [`EventRouter`] and are turned into uploads, inline moves or grace
//!    timers.
//! 3. **Background loops**: upload dispatcher, delete dispatcher, periodic
//!    resync and the event router, all stopped by one [`CancellationToken`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use partsync_core::config::Config;
use partsync_core::domain::{FolderMove, RemoteFolder, RemoteId, SyncPlan, TrackingEntry};
use partsync_core::ports::{IPartsApi, ITrackingStore};

use crate::folders::FolderResolver;
use crate::grace::{GraceOutcome, GracePeriod};
use crate::pipeline::{PipelineSettings, Pipelines};
use crate::reconcile::{cleanup_empty_folders, folders_to_keep, reconcile_pass, LocalIndex};
use crate::remote_cache::RemoteCache;
use crate::scanner::Scanner;
use crate::scheduler::{EventRouter, EventSink};
use crate::stats::{EngineStats, StatsSnapshot};
use crate::watcher::{ChangeEvent, FileWatcher};
use crate::SyncError;

/// How often the event router polls its debounce queue
const ROUTER_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Settings and reports
// ============================================================================

/// Engine-level settings derived from the `sync` config section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub root: PathBuf,
    pub root_folder_name: String,
    pub legacy_folders: Vec<String>,
    pub resync_interval: Duration,
    pub debounce: Duration,
    pub grace_period: Duration,
    pub max_reconcile_passes: u32,
    pub max_file_size_mb: u64,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        let sync = &config.sync;
        Self {
            root: sync.root.clone(),
            root_folder_name: sync.root_folder_name.clone(),
            legacy_folders: sync.legacy_folders.clone(),
            resync_interval: Duration::from_secs(sync.resync_interval_secs),
            debounce: Duration::from_millis(sync.debounce_ms),
            grace_period: Duration::from_secs(sync.grace_period_secs),
            max_reconcile_passes: sync.max_reconcile_passes.max(1),
            max_file_size_mb: sync.max_file_size_mb,
        }
    }
}

/// Summary of one full resync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Reconciliation passes needed to reach the fixed point
    pub passes: u32,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub moves: usize,
    pub conflicts: usize,
    pub folders_deleted: usize,
    pub duration_ms: u64,
}

/// Result of a dry run
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub plan: SyncPlan,
    /// Remote folders cleanup would delete
    pub empty_folders: Vec<RemoteFolder>,
}

struct Converged {
    plan: SyncPlan,
    passes: u32,
    folders_deleted: usize,
}

// ============================================================================
// SyncEngine
// ============================================================================

pub struct SyncEngine {
    settings: EngineSettings,
    api: Arc<dyn IPartsApi>,
    tracking: Arc<dyn ITrackingStore>,
    cache: Arc<RemoteCache>,
    scanner: Scanner,
    folders: Arc<FolderResolver>,
    pipelines: Arc<Pipelines>,
    grace: Arc<GracePeriod>,
    stats: Arc<EngineStats>,
    /// Serializes full resyncs
    resync_lock: Mutex<()>,
    resync_requested: Notify,
}

impl SyncEngine {
    /// Builds an engine from the loaded configuration
    pub fn new(config: &Config, api: Arc<dyn IPartsApi>, tracking: Arc<dyn ITrackingStore>) -> Self {
        Self::with_settings(
            EngineSettings::from(config),
            PipelineSettings::from(&config.pipelines),
            api,
            tracking,
        )
    }

    pub fn with_settings(
        settings: EngineSettings,
        pipeline_settings: PipelineSettings,
        api: Arc<dyn IPartsApi>,
        tracking: Arc<dyn ITrackingStore>,
    ) -> Self {
        let stats = Arc::new(EngineStats::new());
        let cache = Arc::new(RemoteCache::new(
            Arc::clone(&api),
            settings.root_folder_name.clone(),
            settings.legacy_folders.clone(),
        ));
        let scanner = Scanner::new(settings.root.clone(), settings.max_file_size_mb);
        let folders = Arc::new(FolderResolver::new(
            Arc::clone(&api),
            Arc::clone(&cache),
            Arc::clone(&stats),
        ));
        let pipelines = Arc::new(Pipelines::new(
            Arc::clone(&api),
            Arc::clone(&tracking),
            Arc::clone(&cache),
            Arc::clone(&folders),
            scanner.clone(),
            Arc::clone(&stats),
            pipeline_settings,
        ));
        let grace = Arc::new(GracePeriod::new(settings.grace_period));

        Self {
            settings,
            api,
            tracking,
            cache,
            scanner,
            folders,
            pipelines,
            grace,
            stats,
            resync_lock: Mutex::new(()),
            resync_requested: Notify::new(),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn cache(&self) -> &Arc<RemoteCache> {
        &self.cache
    }

    pub fn pipelines(&self) -> &Arc<Pipelines> {
        &self.pipelines
    }

    pub fn tracking(&self) -> &Arc<dyn ITrackingStore> {
        &self.tracking
    }

    pub fn grace(&self) -> &Arc<GracePeriod> {
        &self.grace
    }

    /// Asks the periodic loop to run a full resync as soon as possible
    pub fn request_resync(&self) {
        self.resync_requested.notify_one();
    }

    async fn check_root(&self) -> Result<(), SyncError> {
        match tokio::fs::metadata(&self.settings.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            _ => Err(SyncError::RootUnavailable(self.settings.root.clone())),
        }
    }

    async fn scan_local(&self) -> Result<LocalIndex> {
        let scan = self.scanner.scan_all().await?;
        if scan.oversized > 0 {
            info!(count = scan.oversized, "Skipping files above the size limit");
        }
        let held = self.grace.pending_paths();
        if !held.is_empty() {
            debug!(count = held.len(), "Holding paths inside their grace window");
        }
        Ok(LocalIndex::from_scan(scan, &self.scanner).await.with_held(held))
    }

    // ------------------------------------------------------------------
    // Full resync
    // ------------------------------------------------------------------

    /// Runs reconciliation to its fixed point against `tracking`
    async fn converge(&self, local: &LocalIndex, tracking: &dyn ITrackingStore) -> Result<Converged> {
        let max_passes = self.settings.max_reconcile_passes.max(1);
        let mut folders_deleted = 0;

        for pass in 1..=max_passes {
            self.stats.record_reconcile_pass();
            let snapshot = self.cache.rebuild().await?;
            let plan = reconcile_pass(local, &snapshot, tracking).await?;

            let keep = folders_to_keep(local, &plan);
            let removed = match cleanup_empty_folders(self.api.as_ref(), &snapshot, &keep, false).await {
                Ok(removed) => removed,
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "Empty-folder cleanup failed, keeping plan");
                    Vec::new()
                }
            };

            if removed.is_empty() {
                debug!(pass, "Reconciliation converged");
                return Ok(Converged {
                    plan,
                    passes: pass,
                    folders_deleted,
                });
            }

            let ids: Vec<RemoteId> = removed.iter().map(|f| f.id.clone()).collect();
            self.cache.remove_folders(&ids).await;
            // Folder IDs memoized before the cleanup may now be dangling
            self.folders.reset();
            self.stats.record_folders_deleted(removed.len() as u64);
            folders_deleted += removed.len();
            debug!(pass, removed = removed.len(), "Folders deleted, repeating pass");
        }

        self.stats.record_not_converged();
        warn!(passes = max_passes, "Reconciliation did not converge, nothing enqueued this cycle");
        Err(SyncError::NotConverged { passes: max_passes }.into())
    }

    async fn execute(&self, plan: &SyncPlan) {
        for conflict in &plan.conflicts {
            warn!(
                path = %conflict.local_path.display(),
                remote_id = ?conflict.remote_id.as_ref().map(RemoteId::as_str),
                reason = %conflict.reason,
                "Unresolved conflict"
            );
            self.stats.record_conflict();
        }

        for mv in &plan.folder_moves {
            if let Err(e) = self.pipelines.move_part(mv).await {
                warn!(remote_id = %mv.remote_id, to = %mv.to, error = %format!("{e:#}"), "Move failed, retrying next resync");
            }
        }

        for file in &plan.creates {
            self.pipelines.enqueue_upload(file.absolute_path.clone()).await;
        }
        for update in &plan.updates {
            self.pipelines
                .enqueue_upload(update.local.absolute_path.clone())
                .await;
        }
        for part in &plan.deletes {
            self.pipelines.enqueue_delete(part.clone()).await;
        }
    }

    /// Scans, reconciles to a fixed point, and hands the plan to the pipelines
    ///
    /// # Errors
    /// [`SyncError::RootUnavailable`] if the watch root is gone,
    /// [`SyncError::NotConverged`] if the pass cap was reached (nothing is
    /// enqueued), or any error from the remote listing or tracking store.
    #[tracing::instrument(skip(self))]
    pub async fn full_sync(&self) -> Result<SyncReport> {
        let _guard = self.resync_lock.lock().await;
        let started = Instant::now();

        self.check_root().await?;
        let local = self.scan_local().await?;
        let converged = self.converge(&local, self.tracking.as_ref()).await?;
        let plan = &converged.plan;

        self.execute(plan).await;

        let report = SyncReport {
            passes: converged.passes,
            creates: plan.creates.len(),
            updates: plan.updates.len(),
            deletes: plan.deletes.len(),
            moves: plan.folder_moves.len(),
            conflicts: plan.conflicts.len(),
            folders_deleted: converged.folders_deleted,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            local_files = local.files.len(),
            summary = %plan.summary(),
            passes = report.passes,
            folders_deleted = report.folders_deleted,
            duration_ms = report.duration_ms,
            "Full resync complete"
        );
        Ok(report)
    }

    /// Full resync followed by draining both queues immediately
    pub async fn run_once(&self) -> Result<SyncReport> {
        let report = self.full_sync().await?;
        self.pipelines.drain().await;
        Ok(report)
    }

    /// Builds the plan without executing anything
    ///
    /// Tracking corrections made during the pass go to `scratch`, which is
    /// seeded with a copy of the real tracking store.
    #[tracing::instrument(skip(self, scratch))]
    pub async fn check(&self, scratch: &dyn ITrackingStore) -> Result<CheckReport> {
        self.check_root().await?;

        for entry in self.tracking.list_all().await? {
            scratch.upsert(&entry).await?;
        }

        let local = self.scan_local().await?;
        let snapshot = self.cache.rebuild().await?;
        let plan = reconcile_pass(&local, &snapshot, scratch).await?;
        let keep = folders_to_keep(&local, &plan);
        let empty_folders = cleanup_empty_folders(self.api.as_ref(), &snapshot, &keep, true).await?;

        Ok(CheckReport {
            plan,
            empty_folders,
        })
    }

    /// Runs only the empty-folder cleanup, to a fixed point
    ///
    /// # Returns
    /// Every folder deleted, or on a dry run the folders that would be
    #[tracing::instrument(skip(self))]
    pub async fn cleanup_folders(&self, dry_run: bool) -> Result<Vec<RemoteFolder>> {
        let _guard = self.resync_lock.lock().await;
        self.check_root().await?;

        let scan = self.scanner.scan_all().await?;
        let local = LocalIndex::from_files(Vec::new(), scan.dirs);
        let keep = folders_to_keep(&local, &SyncPlan::new());

        let mut deleted = Vec::new();
        for _ in 0..self.settings.max_reconcile_passes.max(1) {
            let snapshot = self.cache.rebuild().await?;
            let removed = cleanup_empty_folders(self.api.as_ref(), &snapshot, &keep, dry_run).await?;
            if dry_run || removed.is_empty() {
                deleted.extend(removed);
                return Ok(deleted);
            }
            let ids: Vec<RemoteId> = removed.iter().map(|f| f.id.clone()).collect();
            self.cache.remove_folders(&ids).await;
            self.folders.reset();
            self.stats.record_folders_deleted(removed.len() as u64);
            deleted.extend(removed);
        }

        self.stats.record_not_converged();
        Err(SyncError::NotConverged {
            passes: self.settings.max_reconcile_passes.max(1),
        }
        .into())
    }

    // ------------------------------------------------------------------
    // Event handling
    // ------------------------------------------------------------------

    async fn is_dir(path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn on_file_changed(&self, path: PathBuf) -> Result<()> {
        if Self::is_dir(&path).await {
            info!(path = %path.display(), "Directory appeared, scheduling resync");
            self.request_resync();
            return Ok(());
        }
        if !self.scanner.is_candidate(&path) {
            return Ok(());
        }
        if self.grace.is_pending(&path) {
            debug!(path = %path.display(), "Path inside grace window, deferring");
            return Ok(());
        }

        if self.tracking.get_by_path(&path).await?.is_none() {
            if let Some(entry) = self.find_vanished_twin(&path).await? {
                return self.relocate(entry, &path).await;
            }
        }

        self.pipelines.enqueue_upload(path).await;
        Ok(())
    }

    /// A tracking entry with the same content whose file no longer exists
    async fn find_vanished_twin(&self, path: &Path) -> Result<Option<TrackingEntry>> {
        let Some(file) = self.scanner.describe(path).await? else {
            return Ok(None);
        };
        let hash = self.scanner.hasher().hash(&file).await?;

        for entry in self.tracking.get_by_hash(&hash).await? {
            if entry.file_path != path
                && !tokio::fs::try_exists(&entry.file_path).await.unwrap_or(true)
            {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Re-points a tracked part at its file's new path, moving the part
    /// when the folder changed
    #[tracing::instrument(skip(self, entry), fields(from = %entry.file_path.display(), to = %new_path.display()))]
    async fn relocate(&self, entry: TrackingEntry, new_path: &Path) -> Result<()> {
        let Some(file) = self.scanner.describe(new_path).await? else {
            return Ok(());
        };

        let snapshot = self.cache.ensure_built().await?;
        let Some(part) = snapshot.part(&entry.remote_id).cloned() else {
            debug!(remote_id = %entry.remote_id, "Tracked part gone remotely, uploading as new");
            self.tracking.delete(&entry.file_path).await?;
            self.pipelines.enqueue_upload(new_path.to_path_buf()).await;
            return Ok(());
        };

        self.tracking
            .update_path(&entry.file_path, new_path, &file.folder_path, &file.logical_name)
            .await
            .context("Failed to re-key tracking entry")?;

        if part.folder_path != file.folder_path {
            let mv = FolderMove {
                remote_id: part.id.clone(),
                name: part.name.clone(),
                from: part.folder_path.clone(),
                to: file.folder_path.clone(),
            };
            self.pipelines.move_part(&mv).await?;
        } else {
            info!(remote_id = %part.id, "Renamed within folder, remote name kept");
        }

        // Content may have changed along with the path
        self.pipelines.enqueue_upload(new_path.to_path_buf()).await;
        Ok(())
    }

    async fn on_renamed(&self, old: PathBuf, new: PathBuf) -> Result<()> {
        if Self::is_dir(&new).await {
            info!(from = %old.display(), to = %new.display(), "Directory renamed, scheduling resync");
            self.request_resync();
            return Ok(());
        }
        if !self.scanner.is_candidate(&new) {
            return self.on_deleted(old).await;
        }

        match self.tracking.get_by_path(&old).await? {
            Some(entry) => self.relocate(entry, &new).await,
            None => self.on_file_changed(new).await,
        }
    }

    async fn on_deleted(&self, path: PathBuf) -> Result<()> {
        let ctx = self.grace_context();
        if self.scanner.is_candidate(&path) {
            return ctx.settle(path).await;
        }

        // Possibly a directory: every tracked file beneath it gets a window
        let beneath: Vec<PathBuf> = self
            .tracking
            .list_all()
            .await?
            .into_iter()
            .map(|e| e.file_path)
            .filter(|p| p.starts_with(&path) && *p != path)
            .collect();
        if beneath.is_empty() {
            return Ok(());
        }

        info!(path = %path.display(), tracked = beneath.len(), "Directory removed, watching tracked files");
        let mut waits = tokio::task::JoinSet::new();
        for file in beneath {
            let ctx = ctx.clone();
            waits.spawn(async move { (file.clone(), ctx.settle(file).await) });
        }
        while let Some(joined) = waits.join_next().await {
            if let Ok((file, Err(e))) = joined {
                warn!(path = %file.display(), error = %format!("{e:#}"), "Grace handling failed");
            }
        }
        Ok(())
    }

    fn grace_context(&self) -> GraceContext {
        GraceContext {
            grace: Arc::clone(&self.grace),
            scanner: self.scanner.clone(),
            tracking: Arc::clone(&self.tracking),
            cache: Arc::clone(&self.cache),
            pipelines: Arc::clone(&self.pipelines),
        }
    }

    // ------------------------------------------------------------------
    // Background loops
    // ------------------------------------------------------------------

    /// Starts the watcher and every background loop
    ///
    /// The first full resync runs immediately.
    ///
    /// # Errors
    /// Fails if the root is not a directory or the watcher cannot start.
    pub async fn start(self: Arc<Self>, cancel: CancellationToken) -> Result<EngineHandle, SyncError> {
        self.check_root().await?;

        let (mut watcher, change_rx) =
            FileWatcher::new().map_err(|e| SyncError::WatcherFailed(format!("{e:#}")))?;
        watcher
            .watch(&self.settings.root)
            .map_err(|e| SyncError::WatcherFailed(format!("{e:#}")))?;

        info!(
            root = %self.settings.root.display(),
            root_folder = %self.settings.root_folder_name,
            "Sync engine starting"
        );

        let mut tasks = Vec::new();

        let mut router = EventRouter::new(
            change_rx,
            self.settings.debounce,
            ROUTER_POLL_INTERVAL,
            Arc::clone(&self) as Arc<dyn EventSink>,
        );
        let router_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            // The watcher lives exactly as long as the router
            let _watcher = watcher;
            router.run(router_cancel).await;
        }));

        tasks.push(tokio::spawn(
            Arc::clone(&self.pipelines).run_upload_dispatcher(cancel.clone()),
        ));
        tasks.push(tokio::spawn(
            Arc::clone(&self.pipelines).run_delete_dispatcher(cancel.clone()),
        ));

        let engine = Arc::clone(&self);
        tasks.push(tokio::spawn(async move {
            engine.run_resync_loop(cancel).await;
        }));

        Ok(EngineHandle { tasks })
    }

    async fn run_resync_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.resync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.resync_requested.notified() => {}
            }

            match self.full_sync().await {
                Ok(report) => {
                    let stats = self.stats.snapshot();
                    info!(report = ?report, stats = ?stats, "Engine counters");
                }
                Err(e) => warn!(error = %format!("{e:#}"), "Full resync failed"),
            }
        }
        info!("Resync loop stopped");
    }
}

#[async_trait]
impl EventSink for SyncEngine {
    async fn handle_event(&self, event: ChangeEvent) -> Result<()> {
        match event {
            ChangeEvent::Created(path) | ChangeEvent::Modified(path) => {
                self.on_file_changed(path).await
            }
            ChangeEvent::Deleted(path) => self.on_deleted(path).await,
            ChangeEvent::Renamed { old, new } => self.on_renamed(old, new).await,
        }
    }
}

/// Everything a grace timer needs, detached from the engine's lifetime
#[derive(Clone)]
struct GraceContext {
    grace: Arc<GracePeriod>,
    scanner: Scanner,
    tracking: Arc<dyn ITrackingStore>,
    cache: Arc<RemoteCache>,
    pipelines: Arc<Pipelines>,
}

impl GraceContext {
    async fn settle(&self, path: PathBuf) -> Result<()> {
        let outcome = self
            .grace
            .observe(&path, &self.scanner, self.tracking.as_ref())
            .await?;

        match outcome {
            GraceOutcome::Unchanged | GraceOutcome::AlreadyPending => {}
            GraceOutcome::Changed => self.pipelines.enqueue_upload(path).await,
            GraceOutcome::Deleted(remote_id) => {
                let snapshot = self.cache.ensure_built().await?;
                let Some(part) = snapshot.part(&remote_id) else {
                    debug!(remote_id = %remote_id, "Part already absent remotely");
                    return Ok(());
                };
                // Another local file may have taken over this part
                if self.tracking.get_by_remote_id(&remote_id).await?.is_empty() {
                    self.pipelines.enqueue_delete(part.clone()).await;
                } else {
                    debug!(remote_id = %remote_id, "Part still tracked elsewhere, not deleting");
                }
            }
            GraceOutcome::Untracked => {
                debug!(path = %path.display(), "Untracked file gone, leaving to resync");
            }
        }
        Ok(())
    }
}

/// Join handles for the engine's background tasks
pub struct EngineHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Waits for every background task to finish after cancellation
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Engine task ended abnormally");
            }
        }
    }
}
