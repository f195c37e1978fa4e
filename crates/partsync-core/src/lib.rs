//! partsync Core - Domain types and port definitions
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain types** - `LocalFile`, `RemotePart`, `RemoteFolder`, `TrackingEntry`, `SyncPlan`
//! - **Newtypes** - `RemoteId`, `FileHash`, `FolderPath`, `SyncKey`
//! - **Port definitions** - Traits for adapters: `IPartsApi`, `ITrackingStore`
//! - **Configuration** - YAML-backed `Config` with validation and a builder
//!
//! # Architecture
//!
//! The domain module has no I/O. Ports define the trait interfaces that the
//! `partsync-api` (HTTP) and `partsync-cache` (SQLite) crates implement, and
//! the `partsync-sync` engine consumes.

pub mod config;
pub mod domain;
pub mod ports;
