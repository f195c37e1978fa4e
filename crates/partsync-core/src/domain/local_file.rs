//! Local file descriptors and the file-type whitelist
//!
//! A [`LocalFile`] is rebuilt on every scan or filesystem event. Its content
//! hash is filled in lazily by the scanner's hash cache.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{FileHash, FolderPath, SyncKey};

/// Characters the remote rejects in names; replaced with `_`
const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\\'];

/// Compound suffix that must be checked before plain extensions
const GCODE_3MF_SUFFIX: &str = ".gcode.3mf";

// ============================================================================
// PartType
// ============================================================================

/// The remote part type, derived from a whitelisted file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartType {
    Stl,
    #[serde(rename = "3mf")]
    ThreeMf,
    #[serde(rename = "gcode3mf")]
    Gcode3mf,
    Scad,
    Step,
}

impl PartType {
    /// Classify a file name, returning `None` for anything off the whitelist
    ///
    /// Matching is case-insensitive. `.gcode.3mf` wins over `.3mf`.
    #[must_use]
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let lower = file_name.to_ascii_lowercase();
        if lower.ends_with(GCODE_3MF_SUFFIX) && lower.len() > GCODE_3MF_SUFFIX.len() {
            return Some(Self::Gcode3mf);
        }
        let (stem, ext) = lower.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        match ext {
            "stl" => Some(Self::Stl),
            "3mf" => Some(Self::ThreeMf),
            "scad" => Some(Self::Scad),
            "step" | "stp" => Some(Self::Step),
            _ => None,
        }
    }

    /// Value of the `type` field sent to the remote API
    #[must_use]
    pub const fn as_api_str(&self) -> &'static str {
        match self {
            Self::Stl => "stl",
            Self::ThreeMf => "3mf",
            Self::Gcode3mf => "gcode3mf",
            Self::Scad => "scad",
            Self::Step => "step",
        }
    }
}

impl std::fmt::Display for PartType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_api_str())
    }
}

/// Returns true if `path` names a whitelisted, non-hidden file
#[must_use]
pub fn is_whitelisted(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| !n.starts_with('.') && PartType::from_file_name(n).is_some())
}

/// Make a single path component safe for use as a remote name
///
/// `..` sequences are removed and forbidden characters become `_`.
#[must_use]
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .replace("..", "")
        .chars()
        .map(|c| if FORBIDDEN_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let trimmed = cleaned.trim_matches('/').trim();
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.replace('/', "_")
    }
}

/// File name minus its final extension (`plate.gcode.3mf` -> `plate.gcode`)
#[must_use]
pub fn logical_name(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(0) | None => file_name,
        Some(idx) => &file_name[..idx],
    }
}

// ============================================================================
// LocalFile
// ============================================================================

/// One whitelisted file found under the watch root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFile {
    pub absolute_path: PathBuf,
    pub folder_path: FolderPath,
    pub logical_name: String,
    /// Sanitized file name including extension, used for upload naming
    pub file_name: String,
    pub part_type: PartType,
    pub size_bytes: u64,
    pub mtime: DateTime<Utc>,
    /// Filled in on demand; `None` until hashed
    pub content_hash: Option<FileHash>,
}

impl LocalFile {
    /// Describe `absolute_path`, which must lie beneath `root`
    ///
    /// # Errors
    /// Returns error if the path escapes the root, is hidden, or is not a
    /// whitelisted type
    pub fn from_path(
        root: &Path,
        absolute_path: &Path,
        size_bytes: u64,
        mtime: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let (folder_path, raw_name) = split_relative(root, absolute_path)?;

        if raw_name.starts_with('.') {
            return Err(DomainError::UnsupportedFileType(raw_name));
        }
        let part_type = PartType::from_file_name(&raw_name)
            .ok_or_else(|| DomainError::UnsupportedFileType(raw_name.clone()))?;

        let file_name = sanitize_component(&raw_name);
        let logical = logical_name(&file_name).to_string();

        Ok(Self {
            absolute_path: absolute_path.to_path_buf(),
            folder_path,
            logical_name: logical,
            file_name,
            part_type,
            size_bytes,
            mtime,
            content_hash: None,
        })
    }

    /// The `(folder, name)` key shared with the remote index
    ///
    /// # Errors
    /// Returns error only if the logical name is unusable
    pub fn key(&self) -> Result<SyncKey, DomainError> {
        SyncKey::new(self.folder_path.clone(), self.logical_name.clone())
    }

    #[must_use]
    pub fn with_hash(mut self, hash: FileHash) -> Self {
        self.content_hash = Some(hash);
        self
    }
}

/// Relative sanitized folder of `path`'s parent directory under `root`
///
/// # Errors
/// Returns error if `dir` is not beneath `root`
pub fn relative_folder(root: &Path, dir: &Path) -> Result<FolderPath, DomainError> {
    let rel = dir
        .strip_prefix(root)
        .map_err(|_| DomainError::PathNotInWatchRoot(dir.display().to_string()))?;

    let mut folder = FolderPath::root();
    for component in rel.components() {
        match component {
            Component::Normal(seg) => {
                let seg = seg.to_string_lossy();
                folder = folder.join(&sanitize_component(&seg))?;
            }
            Component::CurDir => {}
            _ => {
                return Err(DomainError::PathNotInWatchRoot(dir.display().to_string()));
            }
        }
    }
    Ok(folder)
}

fn split_relative(root: &Path, path: &Path) -> Result<(FolderPath, String), DomainError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| DomainError::PathNotInWatchRoot(path.display().to_string()))?;
    let parent = path
        .parent()
        .ok_or_else(|| DomainError::PathNotInWatchRoot(path.display().to_string()))?;
    Ok((relative_folder(root, parent)?, file_name))
}
