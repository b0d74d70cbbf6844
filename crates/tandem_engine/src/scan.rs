//! Poll mode change detection: a full tree walk per cycle.

use crate::digest::Fingerprint;
use crate::error::{DetectionError, DetectionResult};
use crate::snapshot::{FileRecord, Snapshot};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub use tandem_protocol::TEMP_PREFIX;

/// Scans an endpoint root into a [`Snapshot`].
///
/// Every regular file is hashed on every call. Symlinks are not followed.
#[derive(Debug, Clone)]
pub struct PollDetector {
    root: PathBuf,
}

impl PollDetector {
    /// Creates a detector for `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the scanned root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walks the tree and fingerprints every regular file.
    ///
    /// Files that vanish between being listed and being read are skipped;
    /// they will be reported as deleted by the diff against the previous
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns `RootUnavailable` if the root is not a directory, or a walk
    /// or I/O error for anything other than a vanished file.
    pub fn detect(&self) -> DetectionResult<Snapshot> {
        let taken_at = Instant::now();
        if !self.root.is_dir() {
            return Err(DetectionError::RootUnavailable(self.root.clone()));
        }

        let mut snapshot = Snapshot::with_time(taken_at);
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if is_not_found(e.io_error()) => continue,
                Err(e) => return Err(e.into()),
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(relative) = relative_path(&self.root, entry.path()) else {
                warn!(path = ?entry.path(), "skipping file with non UTF-8 path");
                continue;
            };
            if is_transfer_temp(&relative) {
                continue;
            }

            match read_record(entry.path(), relative) {
                Ok(record) => snapshot.insert(record),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = ?entry.path(), "file vanished during scan");
                }
                Err(e) => return Err(DetectionError::io(entry.path(), e)),
            }
        }

        debug!(root = ?self.root, files = snapshot.len(), "scan complete");
        Ok(snapshot)
    }
}

/// Reads the current record of one file.
pub fn read_record(path: &Path, relative: impl Into<String>) -> io::Result<FileRecord> {
    let modified_at = std::fs::metadata(path)?.modified()?;
    let fingerprint = Fingerprint::of_file(path)?;
    Ok(FileRecord::new(relative, modified_at, fingerprint))
}

/// Converts `path` under `root` into a `/`-separated relative path.
///
/// Returns `None` if `path` is not under `root`, equals it, or is not
/// valid UTF-8.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let stripped = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in stripped.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Returns true if the last segment of `relative` names a transfer temp file.
pub fn is_transfer_temp(relative: &str) -> bool {
    relative
        .rsplit('/')
        .next()
        .is_some_and(|name| name.starts_with(TEMP_PREFIX))
}

fn is_not_found(error: Option<&io::Error>) -> bool {
    error.is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
}
