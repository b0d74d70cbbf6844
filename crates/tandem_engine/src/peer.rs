//! What a coordinator believes the other endpoint holds.

use crate::snapshot::{FileRecord, Snapshot, SnapshotCell};
use std::sync::Arc;

/// Source of the peer's last known snapshot.
pub trait PeerView: Send + Sync {
    /// Returns the peer's last known snapshot.
    fn last_known(&self) -> Arc<Snapshot>;

    /// Records that `path` now holds `record` at the peer (`None` = deleted).
    fn observe(&self, path: &str, record: Option<FileRecord>);
}

/// The peer coordinator's own published snapshot (both trees local).
///
/// The peer is the only writer, so observations are ignored.
impl PeerView for SnapshotCell {
    fn last_known(&self) -> Arc<Snapshot> {
        self.load()
    }

    fn observe(&self, _path: &str, _record: Option<FileRecord>) {}
}

/// Remote-mode approximation of the peer's snapshot.
///
/// Built only from acknowledged transfers in both directions: files we
/// pushed, deletes we sent, and files or deletes the peer pushed to us.
/// Records are stored as they look on the local tree.
#[derive(Debug, Default)]
pub struct PeerLedger {
    cell: SnapshotCell,
}

impl PeerLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of files believed to be at the peer.
    pub fn len(&self) -> usize {
        self.cell.load().len()
    }

    /// Returns true if the peer is believed to hold nothing.
    pub fn is_empty(&self) -> bool {
        self.cell.load().is_empty()
    }
}

impl PeerView for PeerLedger {
    fn last_known(&self) -> Arc<Snapshot> {
        self.cell.load()
    }

    fn observe(&self, path: &str, record: Option<FileRecord>) {
        self.cell.update(|current| match record {
            Some(record) => current.with_record(record),
            None => current.without(path),
        });
    }
}
