//! Transfer channel abstraction: how actions reach the other endpoint.

use crate::diff::{Side, SyncAction};
use crate::endpoint::Endpoint;
use crate::error::{TransferError, TransferResult};
use crate::snapshot::FileRecord;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use tracing::debug;

/// Acknowledgement of one applied action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// The file was written; carries its record as installed.
    Copied(FileRecord),
    /// The file was deleted.
    Deleted,
    /// The file to delete was already gone.
    NotFound,
    /// The target changed since the caller's view and nothing was applied;
    /// carries what the target holds now (`None` = absent).
    Superseded(Option<FileRecord>),
}

/// A channel applies sync actions between the two endpoints of a pair.
///
/// Implementations must tolerate concurrent calls from the coordinators
/// of both directions.
pub trait TransferChannel: Send + Sync {
    /// Applies one action.
    fn send(&self, action: &SyncAction) -> TransferResult<Ack>;

    /// Applies one action, given the record the caller believes the target
    /// side holds for the path.
    ///
    /// Channels that can inspect the target refuse to act on a stale view
    /// and answer [`Ack::Superseded`]. The default ignores `expected`.
    fn send_expecting(
        &self,
        action: &SyncAction,
        expected: Option<&FileRecord>,
    ) -> TransferResult<Ack> {
        let _ = expected;
        self.send(action)
    }
}

/// Channel between two trees on the same machine.
///
/// Both trees are visible, so every action is checked against the target
/// as it is on disk: a copy never replaces a file at least as new as the
/// source, and a delete only removes the version the caller expected.
#[derive(Debug, Clone)]
pub struct LocalChannel {
    local: Endpoint,
    peer: Endpoint,
}

impl LocalChannel {
    /// Creates a channel from `local` to `peer`.
    pub fn new(local: Endpoint, peer: Endpoint) -> Self {
        Self { local, peer }
    }

    fn side(&self, side: Side) -> &Endpoint {
        match side {
            Side::Local => &self.local,
            Side::Peer => &self.peer,
        }
    }
}

impl TransferChannel for LocalChannel {
    fn send(&self, action: &SyncAction) -> TransferResult<Ack> {
        self.send_expecting(action, None)
    }

    fn send_expecting(
        &self,
        action: &SyncAction,
        expected: Option<&FileRecord>,
    ) -> TransferResult<Ack> {
        match action {
            SyncAction::CopyTo { path, from, to } => {
                let source = self.side(*from);
                let target = self.side(*to);
                let current = target.record(path)?;
                if let Some(current) = current {
                    let incoming = source
                        .record(path)?
                        .ok_or_else(|| TransferError::Io(io::ErrorKind::NotFound.into()))?;
                    if current.modified_at >= incoming.modified_at {
                        debug!(path = %path, to = %to, "target is not older; copy skipped");
                        return Ok(Ack::Superseded(Some(current)));
                    }
                }

                let record = target.install_copy(path, &source.resolve(path)?)?;
                debug!(path = %path, from = %from, to = %to, "copied");
                Ok(Ack::Copied(record))
            }
            SyncAction::DeleteAt { path, at } => {
                let target = self.side(*at);
                if let Some(expected) = expected {
                    let current = target.record(path)?;
                    if current.as_ref() != Some(expected) {
                        debug!(path = %path, at = %at, "target changed; delete skipped");
                        return Ok(match current {
                            Some(record) => Ack::Superseded(Some(record)),
                            None => Ack::NotFound,
                        });
                    }
                }

                if target.remove(path)? {
                    Ok(Ack::Deleted)
                } else {
                    Ok(Ack::NotFound)
                }
            }
        }
    }
}

/// A channel that records actions instead of applying them.
///
/// Copies are acknowledged with a caller-provided record; paths marked
/// with [`fail_on`](Self::fail_on) return an I/O error.
#[derive(Debug, Default)]
pub struct MockChannel {
    sent: Mutex<Vec<SyncAction>>,
    failing: Mutex<HashSet<String>>,
    records: Mutex<Vec<FileRecord>>,
}

impl MockChannel {
    /// Creates an empty mock channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every action on `path` fail.
    pub fn fail_on(&self, path: impl Into<String>) {
        self.failing.lock().insert(path.into());
    }

    /// Stops failing actions on `path`.
    pub fn heal(&self, path: &str) {
        self.failing.lock().remove(path);
    }

    /// Sets the record returned when `record.relative_path` is copied.
    pub fn set_record(&self, record: FileRecord) {
        let mut records = self.records.lock();
        records.retain(|r| r.relative_path != record.relative_path);
        records.push(record);
    }

    /// Returns every action received so far, failed ones included.
    pub fn sent(&self) -> Vec<SyncAction> {
        self.sent.lock().clone()
    }

    /// Forgets the recorded actions.
    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl TransferChannel for MockChannel {
    fn send(&self, action: &SyncAction) -> TransferResult<Ack> {
        self.sent.lock().push(action.clone());
        let path = action.path();
        if self.failing.lock().contains(path) {
            return Err(TransferError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("mock failure for {}", path),
            )));
        }
        match action {
            SyncAction::CopyTo { .. } => self
                .records
                .lock()
                .iter()
                .find(|r| r.relative_path == path)
                .cloned()
                .map(Ack::Copied)
                .ok_or_else(|| TransferError::Unsupported(format!("no mock record for {}", path))),
            SyncAction::DeleteAt { .. } => Ok(Ack::Deleted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echo::EchoSuppressor;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn pair(a: &std::path::Path, b: &std::path::Path) -> (LocalChannel, Endpoint, Endpoint) {
        let ttl = Duration::from_secs(10);
        let ea = Endpoint::new(a, Arc::new(EchoSuppressor::new(ttl)));
        let eb = Endpoint::new(b, Arc::new(EchoSuppressor::new(ttl)));
        (LocalChannel::new(ea.clone(), eb.clone()), ea, eb)
    }

    #[test]
    fn local_push_and_pull() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let (channel, ea, eb) = pair(a.path(), b.path());

        fs::write(a.path().join("up.txt"), b"up").unwrap();
        let ack = channel.send(&SyncAction::push("up.txt")).unwrap();
        assert!(matches!(ack, Ack::Copied(_)));
        assert_eq!(fs::read(b.path().join("up.txt")).unwrap(), b"up");
        assert!(eb.suppressor().should_suppress("up.txt"));

        fs::write(b.path().join("down.txt"), b"down").unwrap();
        channel.send(&SyncAction::pull("down.txt")).unwrap();
        assert_eq!(fs::read(a.path().join("down.txt")).unwrap(), b"down");
        assert!(ea.suppressor().should_suppress("down.txt"));
    }

    #[test]
    fn local_copy_keeps_records_equal() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let (channel, ea, eb) = pair(a.path(), b.path());
        fs::write(a.path().join("f"), b"same").unwrap();

        let Ack::Copied(installed) = channel.send(&SyncAction::push("f")).unwrap() else {
            panic!("expected copy ack");
        };
        let source = ea.record("f").unwrap().unwrap();
        assert_eq!(installed, source);
        assert_eq!(eb.record("f").unwrap().unwrap(), source);
    }

    #[test]
    fn local_delete_then_not_found() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let (channel, _, _) = pair(a.path(), b.path());
        fs::write(b.path().join("f"), b"x").unwrap();

        let delete = SyncAction::delete_at_peer("f");
        assert_eq!(channel.send(&delete).unwrap(), Ack::Deleted);
        assert_eq!(channel.send(&delete).unwrap(), Ack::NotFound);
    }

    #[test]
    fn copy_never_replaces_newer_target() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let (channel, _, eb) = pair(a.path(), b.path());
        fs::write(a.path().join("f"), b"old").unwrap();
        fs::write(b.path().join("f"), b"new").unwrap();
        let old = filetime::FileTime::from_unix_time(1_000, 0);
        let new = filetime::FileTime::from_unix_time(2_000, 0);
        filetime::set_file_mtime(a.path().join("f"), old).unwrap();
        filetime::set_file_mtime(b.path().join("f"), new).unwrap();

        let ack = channel.send(&SyncAction::push("f")).unwrap();
        assert_eq!(ack, Ack::Superseded(eb.record("f").unwrap()));
        assert_eq!(fs::read(b.path().join("f")).unwrap(), b"new");
        assert!(eb.suppressor().is_empty());
    }

    #[test]
    fn delete_of_changed_target_is_skipped() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let (channel, _, eb) = pair(a.path(), b.path());
        fs::write(b.path().join("f"), b"v1").unwrap();
        let v1 = eb.record("f").unwrap().unwrap();
        fs::write(b.path().join("f"), b"v2 edited").unwrap();
        filetime::set_file_mtime(b.path().join("f"), filetime::FileTime::from_unix_time(9_000, 0))
            .unwrap();

        let ack = channel
            .send_expecting(&SyncAction::delete_at_peer("f"), Some(&v1))
            .unwrap();
        assert!(matches!(ack, Ack::Superseded(Some(_))));
        assert!(b.path().join("f").exists());

        let current = eb.record("f").unwrap().unwrap();
        let ack = channel
            .send_expecting(&SyncAction::delete_at_peer("f"), Some(&current))
            .unwrap();
        assert_eq!(ack, Ack::Deleted);
    }

    #[test]
    fn mock_records_and_fails() {
        let mock = MockChannel::new();
        mock.fail_on("bad");

        assert!(mock.send(&SyncAction::delete_at_peer("bad")).is_err());
        assert_eq!(mock.send(&SyncAction::delete_at_peer("ok")).unwrap(), Ack::Deleted);
        assert_eq!(mock.sent().len(), 2);

        mock.heal("bad");
        assert!(mock.send(&SyncAction::delete_at_peer("bad")).is_ok());
    }
}
