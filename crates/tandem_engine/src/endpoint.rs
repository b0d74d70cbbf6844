//! One synchronized tree and every mutation applied to it.

use crate::echo::EchoSuppressor;
use crate::error::{TransferError, TransferResult};
use crate::scan::{read_record, TEMP_PREFIX};
use crate::snapshot::FileRecord;
use filetime::FileTime;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tandem_protocol::{copy_exact, validate_relative_path, ProtocolError};
use tracing::{debug, warn};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A synchronized directory tree.
///
/// Every write goes to a temp file next to its destination and is renamed
/// into place, so a detector never hashes a half-written file. Every
/// mutation marks the path in the suppressor first.
#[derive(Debug, Clone)]
pub struct Endpoint {
    root: PathBuf,
    suppressor: Arc<EchoSuppressor>,
}

impl Endpoint {
    /// Creates an endpoint for `root` sharing `suppressor` with its detector.
    pub fn new(root: impl Into<PathBuf>, suppressor: Arc<EchoSuppressor>) -> Self {
        Self {
            root: root.into(),
            suppressor,
        }
    }

    /// Creates the root directory if it does not exist.
    pub fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the suppressor marked by inbound mutations.
    pub fn suppressor(&self) -> &Arc<EchoSuppressor> {
        &self.suppressor
    }

    /// Resolves a relative path under the root.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` if the path could escape the root.
    pub fn resolve(&self, path: &str) -> TransferResult<PathBuf> {
        validate_relative_path(path).map_err(|_| TransferError::InvalidPath(path.to_string()))?;
        Ok(path.split('/').fold(self.root.clone(), |acc, part| acc.join(part)))
    }

    /// Reads the current record of `path`, `None` if it does not exist.
    pub fn record(&self, path: &str) -> TransferResult<Option<FileRecord>> {
        let full = self.resolve(path)?;
        match read_record(&full, path) {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces `path` with a copy of `source`, keeping the source mtime.
    ///
    /// Returns the record of the installed file.
    pub fn install_copy(&self, path: &str, source: &Path) -> TransferResult<FileRecord> {
        let dest = self.resolve(path)?;
        self.suppressor.mark_suppressed(path);

        let result = self.write_atomically(&dest, |temp| {
            let modified_at = fs::metadata(source)?.modified()?;
            fs::copy(source, temp)?;
            filetime::set_file_mtime(temp, FileTime::from_system_time(modified_at))?;
            Ok(())
        });
        self.finish_write(path, &dest, result)
    }

    /// Writes exactly `size` bytes from `reader` to `path`.
    ///
    /// Returns the record of the received file. On a short read nothing is
    /// installed and the partial temp file is removed.
    pub fn receive(
        &self,
        path: &str,
        reader: &mut dyn Read,
        size: u64,
    ) -> TransferResult<FileRecord> {
        let dest = self.resolve(path)?;
        self.suppressor.mark_suppressed(path);

        let result = self.write_atomically(&dest, |temp| {
            let mut file = File::create(temp)?;
            copy_exact(reader, &mut file, size).map_err(|e| match e {
                ProtocolError::ShortRead { expected, received } => TransferError::ShortRead {
                    path: path.to_string(),
                    expected,
                    received,
                },
                other => TransferError::Protocol(other),
            })?;
            file.sync_all()?;
            Ok(())
        });
        self.finish_write(path, &dest, result)
    }

    /// Deletes `path`. Returns false if it did not exist.
    pub fn remove(&self, path: &str) -> TransferResult<bool> {
        let full = self.resolve(path)?;
        self.suppressor.mark_suppressed(path);

        match fs::remove_file(&full) {
            Ok(()) => {
                debug!(path, root = ?self.root, "removed");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.suppressor.clear(path);
                Ok(false)
            }
            Err(e) => {
                self.suppressor.clear(path);
                Err(e.into())
            }
        }
    }

    /// Runs `fill` against a fresh temp file beside `dest`, then renames it
    /// over `dest`. The temp file is removed on any failure.
    fn write_atomically<F>(&self, dest: &Path, fill: F) -> TransferResult<()>
    where
        F: FnOnce(&Path) -> TransferResult<()>,
    {
        let parent = dest.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;
        let temp = temp_path(parent, dest);

        let result = fill(&temp).and_then(|()| fs::rename(&temp, dest).map_err(Into::into));
        if result.is_err() {
            if let Err(e) = fs::remove_file(&temp) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(temp = ?temp, error = %e, "failed to remove temp file");
                }
            }
        }
        result
    }

    fn finish_write(
        &self,
        path: &str,
        dest: &Path,
        result: TransferResult<()>,
    ) -> TransferResult<FileRecord> {
        if let Err(e) = result {
            self.suppressor.clear(path);
            return Err(e);
        }
        Ok(read_record(dest, path)?)
    }
}

fn temp_path(parent: &Path, dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    parent.join(format!("{}{}-{}-{}", TEMP_PREFIX, std::process::id(), seq, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    fn endpoint(root: &Path) -> Endpoint {
        Endpoint::new(root, Arc::new(EchoSuppressor::new(Duration::from_secs(10))))
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn install_copy_preserves_mtime_and_marks() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let source = src_dir.path().join("notes.txt");
        fs::write(&source, b"hello").unwrap();
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        filetime::set_file_mtime(&source, FileTime::from_system_time(mtime)).unwrap();

        let dst = endpoint(dst_dir.path());
        let record = dst.install_copy("sub/notes.txt", &source).unwrap();

        assert_eq!(fs::read(dst_dir.path().join("sub/notes.txt")).unwrap(), b"hello");
        assert_eq!(record.modified_at, mtime);
        assert!(dst.suppressor().should_suppress("sub/notes.txt"));
        assert_eq!(entries(&dst_dir.path().join("sub")), vec!["notes.txt"]);
    }

    #[test]
    fn install_copy_missing_source_clears_mark() {
        let dir = tempdir().unwrap();
        let ep = endpoint(dir.path());

        let result = ep.install_copy("x", &dir.path().join("nope"));
        assert!(matches!(result, Err(TransferError::Io(_))));
        assert!(ep.suppressor().is_empty());
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn receive_exact_size() {
        let dir = tempdir().unwrap();
        let ep = endpoint(dir.path());
        let mut stream = Cursor::new(b"helloTRAILING".to_vec());

        let record = ep.receive("notes.txt", &mut stream, 5).unwrap();
        assert_eq!(fs::read(dir.path().join("notes.txt")).unwrap(), b"hello");
        assert_eq!(record.fingerprint, crate::digest::Fingerprint::of_bytes(b"hello"));
        assert_eq!(stream.position(), 5);
    }

    #[test]
    fn short_read_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"previous").unwrap();
        let ep = endpoint(dir.path());

        let result = ep.receive("notes.txt", &mut Cursor::new(b"abc".to_vec()), 10);
        match result {
            Err(TransferError::ShortRead {
                path,
                expected,
                received,
            }) => {
                assert_eq!(path, "notes.txt");
                assert_eq!(expected, 10);
                assert_eq!(received, 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(fs::read(dir.path().join("notes.txt")).unwrap(), b"previous");
        assert_eq!(entries(dir.path()), vec!["notes.txt"]);
    }

    #[test]
    fn remove_reports_presence() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("f"), b"x").unwrap();
        let ep = endpoint(dir.path());

        assert!(ep.remove("f").unwrap());
        assert!(!dir.path().join("f").exists());
        assert!(ep.suppressor().should_suppress("f"));

        assert!(!ep.remove("f").unwrap());
        assert!(ep.suppressor().is_empty());
    }

    #[test]
    fn rejects_escaping_paths() {
        let dir = tempdir().unwrap();
        let ep = endpoint(dir.path());

        for bad in ["../evil", "/etc/passwd", "a/../../b", ""] {
            assert!(matches!(ep.resolve(bad), Err(TransferError::InvalidPath(_))));
        }
        assert!(matches!(
            ep.receive("../evil", &mut Cursor::new(vec![1]), 1),
            Err(TransferError::InvalidPath(_))
        ));
    }

    #[test]
    fn record_of_missing_file() {
        let dir = tempdir().unwrap();
        assert!(endpoint(dir.path()).record("missing").unwrap().is_none());
    }
}
