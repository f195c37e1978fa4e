//! Reconciliation plans
//!
//! A [`SyncPlan`] is the output of one reconciliation run. It is ephemeral:
//! built, handed to the execution pipelines, then dropped.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::local_file::LocalFile;
use super::newtypes::{FolderPath, RemoteId};
use super::remote::RemotePart;

/// Existing remote part whose content must be replaced by the local file's
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedUpdate {
    pub local: LocalFile,
    pub part: RemotePart,
}

/// Reassign a part to another folder without touching its content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderMove {
    pub remote_id: RemoteId,
    pub name: String,
    pub from: FolderPath,
    pub to: FolderPath,
}

/// A local file that could not be resolved this pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanConflict {
    pub local_path: PathBuf,
    pub remote_id: Option<RemoteId>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    pub creates: Vec<LocalFile>,
    pub updates: Vec<PlannedUpdate>,
    pub deletes: Vec<RemotePart>,
    pub folder_moves: Vec<FolderMove>,
    pub conflicts: Vec<PlanConflict>,
}

impl SyncPlan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when nothing at all needs doing, including conflicts
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.has_mutations() && self.conflicts.is_empty()
    }

    /// True when the plan would change anything remotely
    #[must_use]
    pub fn has_mutations(&self) -> bool {
        !(self.creates.is_empty()
            && self.updates.is_empty()
            && self.deletes.is_empty()
            && self.folder_moves.is_empty())
    }

    /// One-line summary for logging
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} create(s), {} update(s), {} delete(s), {} move(s), {} conflict(s)",
            self.creates.len(),
            self.updates.len(),
            self.deletes.len(),
            self.folder_moves.len(),
            self.conflicts.len()
        )
    }
}
