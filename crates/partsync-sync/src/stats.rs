//! Engine counters
//!
//! Monotonic counters updated by the pipelines and reconciler. A
//! [`StatsSnapshot`] is a plain copy suitable for logging or JSON output.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct EngineStats {
    uploads_queued: AtomicU64,
    uploads_completed: AtomicU64,
    uploads_failed: AtomicU64,
    deletes_queued: AtomicU64,
    deletes_completed: AtomicU64,
    deletes_failed: AtomicU64,
    moves: AtomicU64,
    folders_created: AtomicU64,
    folders_deleted: AtomicU64,
    conflicts: AtomicU64,
    reconcile_passes: AtomicU64,
    not_converged: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub uploads_queued: u64,
    pub uploads_completed: u64,
    pub uploads_failed: u64,
    pub deletes_queued: u64,
    pub deletes_completed: u64,
    pub deletes_failed: u64,
    pub moves: u64,
    pub folders_created: u64,
    pub folders_deleted: u64,
    pub conflicts: u64,
    pub reconcile_passes: u64,
    pub not_converged: u64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_upload_queued, uploads_queued);
    counter!(record_upload_completed, uploads_completed);
    counter!(record_upload_failed, uploads_failed);
    counter!(record_delete_queued, deletes_queued);
    counter!(record_delete_completed, deletes_completed);
    counter!(record_delete_failed, deletes_failed);
    counter!(record_move, moves);
    counter!(record_folder_created, folders_created);
    counter!(record_conflict, conflicts);
    counter!(record_reconcile_pass, reconcile_passes);
    counter!(record_not_converged, not_converged);

    pub fn record_folders_deleted(&self, count: u64) {
        self.folders_deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uploads_queued: self.uploads_queued.load(Ordering::Relaxed),
            uploads_completed: self.uploads_completed.load(Ordering::Relaxed),
            uploads_failed: self.uploads_failed.load(Ordering::Relaxed),
            deletes_queued: self.deletes_queued.load(Ordering::Relaxed),
            deletes_completed: self.deletes_completed.load(Ordering::Relaxed),
            deletes_failed: self.deletes_failed.load(Ordering::Relaxed),
            moves: self.moves.load(Ordering::Relaxed),
            folders_created: self.folders_created.load(Ordering::Relaxed),
            folders_deleted: self.folders_deleted.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            reconcile_passes: self.reconcile_passes.load(Ordering::Relaxed),
            not_converged: self.not_converged.load(Ordering::Relaxed),
        }
    }
}
