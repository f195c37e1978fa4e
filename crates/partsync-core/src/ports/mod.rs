//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the interfaces the engine depends on; their implementations
//! live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IPartsApi`] - Remote parts/folders service (HTTP adapter in `partsync-api`)
//! - [`ITrackingStore`] - Durable identity table (SQLite adapter in `partsync-cache`)

pub mod parts_api;
pub mod tracking_store;

pub use parts_api::{FolderRecord, IPartsApi, NewPart, PartRecord, SignedUpload};
pub use tracking_store::ITrackingStore;
