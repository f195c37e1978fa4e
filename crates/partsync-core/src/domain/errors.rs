//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! mostly validation failures when constructing newtypes.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid relative folder path
    #[error("Invalid folder path: {0}")]
    InvalidFolderPath(String),

    /// Invalid content hash (expected lowercase hex SHA-256)
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    /// Invalid remote ID format
    #[error("Invalid remote ID: {0}")]
    InvalidRemoteId(String),

    /// Invalid logical name for a part
    #[error("Invalid part name: {0}")]
    InvalidName(String),

    /// File type is not on the synchronization whitelist
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// Path is not within the configured watch root
    #[error("Path not within watch root: {0}")]
    PathNotInWatchRoot(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
