//! Deletion grace period
//!
//! Slicers and editors often save by deleting a file and writing a new one
//! in its place. A delete notification therefore does not delete anything
//! right away: the path is armed, the grace window elapses, and only then is
//! the path re-examined.
//!
//! ```text
//! Deleted ──(window)──┬── file exists ──┬── same hash ──→ Unchanged (no-op)
//!                     │                 └── new hash  ──→ Changed (upload)
//!                     └── file absent ──┬── tracked   ──→ Deleted (purge + remote delete)
//!                                       └── untracked ──→ Untracked (left to resync)
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use dashmap::DashMap;
use tracing::{debug, info};

use partsync_core::domain::{FileHash, RemoteId};
use partsync_core::ports::ITrackingStore;

use crate::scanner::Scanner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraceOutcome {
    /// The file came back with identical content
    Unchanged,
    /// The file came back with different content
    Changed,
    /// The file stayed gone; its tracking entry has been purged
    Deleted(RemoteId),
    /// The file stayed gone and was never tracked
    Untracked,
    /// The path was already inside its window; this notification was ignored
    AlreadyPending,
}

/// Paths currently waiting out their grace window
pub struct GracePeriod {
    window: Duration,
    pending: DashMap<PathBuf, Option<FileHash>>,
}

impl GracePeriod {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Snapshot of the armed paths
    pub fn pending_paths(&self) -> Vec<PathBuf> {
        self.pending.iter().map(|e| e.key().clone()).collect()
    }

    /// Arms `path`; returns `false` if it is already armed
    fn arm(&self, path: &Path, pre_hash: Option<FileHash>) -> bool {
        match self.pending.entry(path.to_path_buf()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(pre_hash);
                true
            }
        }
    }

    /// Waits out the window for a deleted path and classifies what happened
    ///
    /// The pre-delete hash comes from the tracking entry, falling back to
    /// the scanner's hash cache for untracked files.
    pub async fn observe(
        &self,
        path: &Path,
        scanner: &Scanner,
        tracking: &dyn ITrackingStore,
    ) -> Result<GraceOutcome> {
        let pre_hash = match tracking.get_by_path(path).await? {
            Some(entry) => Some(entry.content_hash),
            None => scanner.hasher().last_known(path),
        };

        if !self.arm(path, pre_hash) {
            debug!(path = %path.display(), "Already in grace window");
            return Ok(GraceOutcome::AlreadyPending);
        }
        debug!(path = %path.display(), window_ms = self.window.as_millis() as u64, "Grace window armed");

        tokio::time::sleep(self.window).await;

        let pre_hash = self.pending.remove(path).and_then(|(_, h)| h);
        let outcome = self.classify(path, pre_hash, scanner, tracking).await;
        if let Ok(o) = &outcome {
            debug!(path = %path.display(), outcome = ?o, "Grace window closed");
        }
        outcome
    }

    async fn classify(
        &self,
        path: &Path,
        pre_hash: Option<FileHash>,
        scanner: &Scanner,
        tracking: &dyn ITrackingStore,
    ) -> Result<GraceOutcome> {
        if let Some(file) = scanner.describe(path).await? {
            let hash = scanner.hasher().hash(&file).await?;
            return Ok(if pre_hash.as_ref() == Some(&hash) {
                GraceOutcome::Unchanged
            } else {
                GraceOutcome::Changed
            });
        }

        scanner.hasher().invalidate(path);
        match tracking.get_by_path(path).await? {
            Some(entry) => {
                tracking.delete(path).await?;
                info!(path = %path.display(), remote_id = %entry.remote_id, "Deletion confirmed after grace period");
                Ok(GraceOutcome::Deleted(entry.remote_id))
            }
            None => Ok(GraceOutcome::Untracked),
        }
    }
}
