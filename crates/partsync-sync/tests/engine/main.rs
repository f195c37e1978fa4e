//! Integration tests for partsync-sync
//!
//! Drives a real [`SyncEngine`](partsync_sync::SyncEngine) over a temporary
//! directory, an in-memory tracking store and an in-memory parts API.

mod common;

mod test_check;
mod test_events;
mod test_folders;
mod test_reconcile;
