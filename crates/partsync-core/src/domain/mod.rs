//! Domain entities and business rules
//!
//! This module contains the core domain types for partsync:
//! - Newtypes for validated identifiers, hashes and folder paths
//! - Local file descriptors and the file-type whitelist
//! - Remote part and folder records as seen by the engine
//! - Identity tracking entries
//! - Reconciliation plans

pub mod errors;
pub mod local_file;
pub mod newtypes;
pub mod plan;
pub mod remote;
pub mod tracking;

// Re-export commonly used types
pub use errors::DomainError;
pub use local_file::{
    is_whitelisted, logical_name, relative_folder, sanitize_component, LocalFile, PartType,
};
pub use newtypes::*;
pub use plan::{FolderMove, PlanConflict, PlannedUpdate, SyncPlan};
pub use remote::{RemoteFolder, RemotePart};
pub use tracking::TrackingEntry;
