//! File watching and debounced change queue
//!
//! Provides a [`FileWatcher`] that wraps the `notify` crate to monitor the
//! watch root recursively, converting raw OS events into [`ChangeEvent`]
//! values on a bounded channel.
//!
//! The [`DebouncedChangeQueue`] collects rapid-fire events and coalesces them
//! per path so that downstream consumers only see the final event for a path
//! after it has been quiet for the debounce window.
//!
//! ## Architecture
//!
//! ```text
//! inotify / FSEvents / ReadDirectoryChangesW
//!       │
//!       ▼
//!  FileWatcher  ──→  mpsc::channel(1024)  ──→  EventRouter (DebouncedChangeQueue)  ──→  SyncEngine
//! ```
//!
//! The notify callback runs on the watcher's own thread and does nothing but
//! map the event and `blocking_send` it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Capacity of the watcher → router channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ============================================================================
// ChangeEvent
// ============================================================================

/// A filesystem change, decoupled from `notify`'s raw event types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A file or directory appeared
    Created(PathBuf),
    /// File content or metadata changed
    Modified(PathBuf),
    /// A file or directory disappeared
    Deleted(PathBuf),
    /// A file or directory was renamed/moved within the watch root
    Renamed {
        /// The original path before the rename
        old: PathBuf,
        /// The new path after the rename
        new: PathBuf,
    },
}

impl ChangeEvent {
    /// Returns the primary path associated with this event
    ///
    /// For rename events, this returns the new (destination) path.
    pub fn path(&self) -> &Path {
        match self {
            ChangeEvent::Created(p) | ChangeEvent::Modified(p) | ChangeEvent::Deleted(p) => p,
            ChangeEvent::Renamed { new, .. } => new,
        }
    }
}

// ============================================================================
// FileWatcher
// ============================================================================

/// Watches the sync root using the OS-native mechanism
///
/// Dropping the watcher stops event delivery and eventually closes the
/// channel once every sender clone is gone.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    root: Option<PathBuf>,
}

impl FileWatcher {
    /// Creates a watcher and the receiver its events arrive on
    ///
    /// # Errors
    /// Returns an error if the underlying OS watcher cannot be created
    pub fn new() -> Result<(Self, mpsc::Receiver<ChangeEvent>)> {
        let (event_tx, event_rx) = mpsc::channel::<ChangeEvent>(EVENT_CHANNEL_CAPACITY);

        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if let Some(change) = map_notify_event(&event) {
                        if let Err(e) = event_tx.blocking_send(change) {
                            warn!(error = %e, "Failed to send change event (receiver dropped)");
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "File watcher error");
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        Ok((Self { watcher, root: None }, event_rx))
    }

    /// Starts watching `path` recursively
    ///
    /// # Errors
    /// Returns an error if the path cannot be watched (missing, permission
    /// denied, inotify watch limit reached)
    pub fn watch(&mut self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "Starting recursive watch");

        self.watcher
            .watch(path, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch path: {}", path.display()))?;
        self.root = Some(path.to_path_buf());
        Ok(())
    }

    /// Stops watching the current root, if any
    pub fn unwatch(&mut self) -> Result<()> {
        if let Some(root) = self.root.take() {
            info!(path = %root.display(), "Stopping watch");
            self.watcher
                .unwatch(&root)
                .with_context(|| format!("Failed to unwatch path: {}", root.display()))?;
        }
        Ok(())
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }
}

// ============================================================================
// Event mapping - notify::Event → ChangeEvent
// ============================================================================

/// Converts a `notify::Event` into a `ChangeEvent`
///
/// - `Create(*)` -> `Created`
/// - `Modify(Name(Both))` with 2 paths -> `Renamed`
/// - `Modify(Name(From))` -> `Deleted` (the path left the tree or is half of an unpaired rename)
/// - `Modify(Name(To))` -> `Created`
/// - `Remove(*)` -> `Deleted`
/// - any other `Modify(*)` -> `Modified`
///
/// Access events and events without paths are dropped.
fn map_notify_event(event: &notify::Event) -> Option<ChangeEvent> {
    let paths = &event.paths;

    match &event.kind {
        EventKind::Create(_) => Some(ChangeEvent::Created(paths.first()?.clone())),

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if paths.len() >= 2 {
                Some(ChangeEvent::Renamed {
                    old: paths[0].clone(),
                    new: paths[1].clone(),
                })
            } else {
                let path = paths.first()?;
                debug!(path = %path.display(), "Rename with single path, treating as Modified");
                Some(ChangeEvent::Modified(path.clone()))
            }
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            Some(ChangeEvent::Deleted(paths.first()?.clone()))
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            Some(ChangeEvent::Created(paths.first()?.clone()))
        }

        EventKind::Remove(_) => Some(ChangeEvent::Deleted(paths.first()?.clone())),

        EventKind::Modify(_) => Some(ChangeEvent::Modified(paths.first()?.clone())),

        _ => None,
    }
}

// ============================================================================
// File stability check
// ============================================================================

/// Checks that a file is not still being written
///
/// Reads the size twice, `check_interval` apart. Returns `false` if the size
/// changed or the file could not be read.
pub async fn is_file_stable(path: &Path, check_interval: Duration) -> bool {
    let size_first = match tokio::fs::metadata(path).await {
        Ok(m) => m.len(),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "Cannot stat file for stability check");
            return false;
        }
    };

    tokio::time::sleep(check_interval).await;

    let size_second = match tokio::fs::metadata(path).await {
        Ok(m) => m.len(),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "File vanished during stability check");
            return false;
        }
    };

    size_first == size_second
}

// ============================================================================
// DebouncedChangeQueue
// ============================================================================

/// Coalesces rapid filesystem changes per path
///
/// When several events arrive for the same path, only the latest is kept and
/// its timestamp is reset, so a file being written keeps extending its own
/// debounce window. A rename is keyed by its destination and also drops any
/// pending event for its source.
pub struct DebouncedChangeQueue {
    pending: HashMap<PathBuf, (ChangeEvent, Instant)>,
    debounce_delay: Duration,
}

impl DebouncedChangeQueue {
    pub fn new(debounce_delay: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            debounce_delay,
        }
    }

    /// Inserts or replaces the pending event for the event's path
    pub fn push(&mut self, event: ChangeEvent) {
        if let ChangeEvent::Renamed { old, .. } = &event {
            self.pending.remove(old);
        }
        let path = event.path().to_path_buf();
        self.pending.insert(path, (event, Instant::now()));
    }

    /// Removes and returns every event quiet for at least the debounce delay
    pub fn poll(&mut self) -> Vec<ChangeEvent> {
        let now = Instant::now();
        let delay = self.debounce_delay;

        let settled_paths: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, (_, ts))| now.duration_since(*ts) >= delay)
            .map(|(path, _)| path.clone())
            .collect();

        let mut settled: Vec<ChangeEvent> = settled_paths
            .iter()
            .filter_map(|p| self.pending.remove(p).map(|(event, _)| event))
            .collect();
        settled.sort_by(|a, b| a.path().cmp(b.path()));
        settled
    }

    /// Removes and returns everything regardless of age
    pub fn drain(&mut self) -> Vec<ChangeEvent> {
        let mut all: Vec<ChangeEvent> = self.pending.drain().map(|(_, (e, _))| e).collect();
        all.sort_by(|a, b| a.path().cmp(b.path()));
        all
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
