//! Local tree scanning and content hashing
//!
//! [`Scanner::scan_all`] walks the watch root and returns every whitelisted
//! file as a [`LocalFile`] together with the set of local directories. Hidden
//! entries (leading `.`) and oversized files are skipped; symlinks are not
//! followed.
//!
//! Hashes are computed lazily through [`ContentHasher`], which remembers the
//! last digest per path and only re-reads a file once its size or mtime
//! changes.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use partsync_core::domain::{relative_folder, FileHash, FolderPath, LocalFile, PartType};

// ============================================================================
// Hashing
// ============================================================================

/// SHA-256 of an in-memory buffer
pub fn hash_bytes(data: &[u8]) -> FileHash {
    FileHash::from_digest(&Sha256::digest(data))
}

/// Streams a file through SHA-256 without loading it whole
fn hash_file_blocking(path: &Path) -> io::Result<FileHash> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(FileHash::from_digest(&hasher.finalize()))
}

#[derive(Debug, Clone)]
struct CachedHash {
    size: u64,
    mtime: DateTime<Utc>,
    hash: FileHash,
}

/// Per-path hash cache invalidated by size or mtime changes
#[derive(Debug, Default)]
pub struct ContentHasher {
    cache: DashMap<PathBuf, CachedHash>,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the content hash of `file`, reusing a cached digest when the
    /// file's size and mtime are unchanged
    pub async fn hash(&self, file: &LocalFile) -> Result<FileHash> {
        if let Some(cached) = self.cache.get(&file.absolute_path) {
            if cached.size == file.size_bytes && cached.mtime == file.mtime {
                return Ok(cached.hash.clone());
            }
        }

        let path = file.absolute_path.clone();
        let hash = tokio::task::spawn_blocking(move || hash_file_blocking(&path))
            .await
            .context("Hash task panicked")?
            .with_context(|| format!("Failed to hash {}", file.absolute_path.display()))?;

        self.cache.insert(
            file.absolute_path.clone(),
            CachedHash {
                size: file.size_bytes,
                mtime: file.mtime,
                hash: hash.clone(),
            },
        );
        Ok(hash)
    }

    /// Records a digest computed elsewhere (e.g. from bytes just uploaded)
    pub fn remember(&self, file: &LocalFile, hash: FileHash) {
        self.cache.insert(
            file.absolute_path.clone(),
            CachedHash {
                size: file.size_bytes,
                mtime: file.mtime,
                hash,
            },
        );
    }

    /// Returns the last known digest for a path regardless of freshness
    pub fn last_known(&self, path: &Path) -> Option<FileHash> {
        self.cache.get(path).map(|c| c.hash.clone())
    }

    pub fn invalidate(&self, path: &Path) {
        self.cache.remove(path);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

// ============================================================================
// Scanner
// ============================================================================

/// Result of a full tree walk
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Whitelisted files, sorted by absolute path
    pub files: Vec<LocalFile>,
    /// Every non-hidden directory under the root, as sanitized relative paths
    pub dirs: BTreeSet<FolderPath>,
    /// Files skipped for exceeding the size limit
    pub oversized: usize,
}

#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    max_file_size: u64,
    hasher: Arc<ContentHasher>,
}

impl Scanner {
    /// # Arguments
    /// * `root` - Watch root
    /// * `max_file_size_mb` - Files larger than this are ignored
    pub fn new(root: impl Into<PathBuf>, max_file_size_mb: u64) -> Self {
        Self {
            root: root.into(),
            max_file_size: max_file_size_mb.saturating_mul(1024 * 1024),
            hasher: Arc::new(ContentHasher::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn hasher(&self) -> &Arc<ContentHasher> {
        &self.hasher
    }

    /// Walks the whole tree
    ///
    /// # Errors
    /// Returns an error only if the root itself cannot be read; unreadable
    /// subdirectories are logged and skipped.
    pub async fn scan_all(&self) -> Result<ScanResult> {
        let root = self.root.clone();
        let max = self.max_file_size;
        let result = tokio::task::spawn_blocking(move || walk(&root, max))
            .await
            .context("Scan task panicked")??;

        debug!(
            files = result.files.len(),
            dirs = result.dirs.len(),
            oversized = result.oversized,
            "Local scan complete"
        );
        Ok(result)
    }

    /// Describes a single path reported by the watcher
    ///
    /// # Returns
    /// `None` if the path does not exist, is not a regular whitelisted file,
    /// lies under a hidden directory, or exceeds the size limit.
    pub async fn describe(&self, path: &Path) -> Result<Option<LocalFile>> {
        if !self.is_candidate(path) {
            return Ok(None);
        }

        let meta = match tokio::fs::symlink_metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to stat {}", path.display()))
            }
        };
        if !meta.is_file() || meta.len() > self.max_file_size {
            return Ok(None);
        }

        let mtime = meta.modified().map(DateTime::<Utc>::from)?;
        Ok(Some(LocalFile::from_path(&self.root, path, meta.len(), mtime)?))
    }

    /// True if `path` could be a tracked file: under the root, no hidden
    /// component, whitelisted extension
    pub fn is_candidate(&self, path: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(&self.root) else {
            return false;
        };
        if rel.as_os_str().is_empty() || has_hidden_component(rel) {
            return false;
        }
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| PartType::from_file_name(n).is_some())
    }

    /// Hashes `file` (cached) and returns it with the hash filled in
    pub async fn with_hash(&self, file: LocalFile) -> Result<LocalFile> {
        if file.content_hash.is_some() {
            return Ok(file);
        }
        let hash = self.hasher.hash(&file).await?;
        Ok(file.with_hash(hash))
    }
}

fn has_hidden_component(rel: &Path) -> bool {
    rel.components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
}

fn walk(root: &Path, max_file_size: u64) -> Result<ScanResult> {
    let mut result = ScanResult::default();
    let mut stack = vec![root.to_path_buf()];
    let mut first = true;

    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if first => {
                return Err(e).with_context(|| format!("Failed to read root {}", dir.display()))
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };
        first = false;

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                match relative_folder(root, &path) {
                    Ok(folder) => {
                        result.dirs.insert(folder);
                    }
                    Err(e) => warn!(dir = %path.display(), error = %e, "Unusable folder name"),
                }
                stack.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let name = entry.file_name();
            if PartType::from_file_name(&name.to_string_lossy()).is_none() {
                continue;
            }

            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot stat file");
                    continue;
                }
            };
            if meta.len() > max_file_size {
                debug!(path = %path.display(), size = meta.len(), "Skipping oversized file");
                result.oversized += 1;
                continue;
            }
            let mtime = match meta.modified() {
                Ok(t) => DateTime::<Utc>::from(t),
                Err(_) => Utc::now(),
            };

            match LocalFile::from_path(root, &path, meta.len(), mtime) {
                Ok(file) => result.files.push(file),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping file"),
            }
        }
    }

    result
        .files
        .sort_by(|a, b| a.absolute_path.cmp(&b.absolute_path));
    Ok(result)
}
