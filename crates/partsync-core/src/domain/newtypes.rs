//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for identifiers and values
//! shared between the local and remote views of the synchronized tree.
//! Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// Remote identifiers
// ============================================================================

/// Identifier assigned by the remote API to a part or folder
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteId(String);

impl RemoteId {
    /// Create a new RemoteId
    ///
    /// # Errors
    /// Returns error if the ID is empty or contains characters outside
    /// `[A-Za-z0-9_-]`
    pub fn new(id: String) -> Result<Self, DomainError> {
        if id.is_empty() {
            return Err(DomainError::InvalidRemoteId(
                "Remote ID cannot be empty".to_string(),
            ));
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DomainError::InvalidRemoteId(format!(
                "Remote ID contains invalid characters: {id}"
            )));
        }

        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RemoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemoteId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for RemoteId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RemoteId> for String {
    fn from(id: RemoteId) -> Self {
        id.0
    }
}

// ============================================================================
// Content hash
// ============================================================================

/// SHA-256 digest of a file's bytes, as 64 lowercase hex characters
///
/// Content equality between a local file and a remote part is decided by
/// comparing these values and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileHash(String);

impl FileHash {
    /// Length of a hex-encoded SHA-256 digest
    const HEX_LEN: usize = 64;

    /// Create a new FileHash
    ///
    /// Uppercase input is accepted and normalized to lowercase.
    ///
    /// # Errors
    /// Returns error if the value is not 64 hex characters
    pub fn new(hash: String) -> Result<Self, DomainError> {
        if hash.is_empty() {
            return Err(DomainError::InvalidHash("Hash cannot be empty".to_string()));
        }

        if hash.len() != Self::HEX_LEN {
            return Err(DomainError::InvalidHash(format!(
                "Hash has wrong length: expected {} hex chars, got {}",
                Self::HEX_LEN,
                hash.len()
            )));
        }

        if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidHash(format!(
                "Hash is not hexadecimal: {hash}"
            )));
        }

        Ok(Self(hash.to_ascii_lowercase()))
    }

    /// Build a FileHash from a raw 32-byte digest
    #[must_use]
    pub fn from_digest(digest: &[u8]) -> Self {
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log output
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl Display for FileHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileHash {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for FileHash {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<FileHash> for String {
    fn from(hash: FileHash) -> Self {
        hash.0
    }
}

// ============================================================================
// Folder paths
// ============================================================================

/// A `/`-separated folder path relative to the sync root
///
/// The empty path is the root itself. Locally it is relative to the watch
/// directory; remotely it is relative to the dedicated sync-root folder
/// (whose own name is never part of the path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FolderPath(String);

impl FolderPath {
    /// Create a new FolderPath
    ///
    /// # Errors
    /// Returns error if the path is absolute, has a trailing slash, or contains
    /// empty, `.` or `..` segments
    pub fn new(path: String) -> Result<Self, DomainError> {
        if path.is_empty() {
            return Ok(Self::root());
        }

        if path.starts_with('/') {
            return Err(DomainError::InvalidFolderPath(format!(
                "Path must be relative: {path}"
            )));
        }

        for segment in path.split('/') {
            Self::check_segment(segment).map_err(|_| {
                DomainError::InvalidFolderPath(format!("Invalid segment in path: {path}"))
            })?;
        }

        Ok(Self(path))
    }

    /// The sync root itself
    #[must_use]
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Returns true for the empty (root) path
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Append one segment
    ///
    /// # Errors
    /// Returns error if `segment` is empty, `.`, `..` or contains a `/`
    pub fn join(&self, segment: &str) -> Result<Self, DomainError> {
        Self::check_segment(segment)?;
        if self.is_root() {
            Ok(Self(segment.to_string()))
        } else {
            Ok(Self(format!("{}/{}", self.0, segment)))
        }
    }

    /// The containing folder, or `None` for the root
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// The last segment, or `None` for the root
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit('/').next()
    }

    /// Iterate the segments from outermost to innermost
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Number of segments (0 for the root)
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Returns true if `self` equals `other` or lies beneath it
    #[must_use]
    pub fn starts_with(&self, other: &FolderPath) -> bool {
        other.is_root()
            || self.0 == other.0
            || (self.0.starts_with(&other.0) && self.0.as_bytes().get(other.0.len()) == Some(&b'/'))
    }

    fn check_segment(segment: &str) -> Result<(), DomainError> {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains('/') {
            return Err(DomainError::InvalidFolderPath(format!(
                "Invalid path segment: '{segment}'"
            )));
        }
        Ok(())
    }
}

impl Display for FolderPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FolderPath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for FolderPath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<FolderPath> for String {
    fn from(path: FolderPath) -> Self {
        path.0
    }
}

// ============================================================================
// Sync key
// ============================================================================

/// The `(folderPath, logicalName)` pair both indexes are keyed by
///
/// Keys are case-sensitive. Displayed as `folder/name`, or just `name`
/// for files at the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncKey {
    folder: FolderPath,
    name: String,
}

impl SyncKey {
    /// Create a new SyncKey
    ///
    /// # Errors
    /// Returns error if `name` is empty or contains a `/`
    pub fn new(folder: FolderPath, name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        if name.is_empty() {
            return Err(DomainError::InvalidName("Name cannot be empty".to_string()));
        }
        if name.contains('/') {
            return Err(DomainError::InvalidName(format!(
                "Name cannot contain '/': {name}"
            )));
        }
        Ok(Self { folder, name })
    }

    #[must_use]
    pub fn folder(&self) -> &FolderPath {
        &self.folder
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Same name under a different folder
    #[must_use]
    pub fn with_folder(&self, folder: FolderPath) -> Self {
        Self {
            folder,
            name: self.name.clone(),
        }
    }
}

impl Display for SyncKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.folder.is_root() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.folder, self.name)
        }
    }
}
