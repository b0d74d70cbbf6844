//! Snapshot store: what one endpoint looked like at one instant.

use crate::digest::Fingerprint;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Last observed metadata for one file.
///
/// Two records are equal iff both the modification time and the
/// fingerprint match. The path is the record's identity inside a
/// snapshot and is not part of the comparison.
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// Path relative to the endpoint root, `/`-separated.
    pub relative_path: String,
    /// Modification time reported by the filesystem.
    pub modified_at: SystemTime,
    /// Content fingerprint.
    pub fingerprint: Fingerprint,
}

impl FileRecord {
    /// Creates a new record.
    pub fn new(
        relative_path: impl Into<String>,
        modified_at: SystemTime,
        fingerprint: Fingerprint,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            modified_at,
            fingerprint,
        }
    }
}

impl PartialEq for FileRecord {
    fn eq(&self, other: &Self) -> bool {
        self.modified_at == other.modified_at && self.fingerprint == other.fingerprint
    }
}

impl Eq for FileRecord {}

/// All records observed for one endpoint during one detection cycle.
///
/// A published snapshot is never mutated; updates build a new instance.
#[derive(Debug, Clone)]
pub struct Snapshot {
    records: BTreeMap<String, FileRecord>,
    taken_at: Instant,
}

impl Snapshot {
    /// Creates an empty snapshot stamped with the current instant.
    pub fn empty() -> Self {
        Self::with_time(Instant::now())
    }

    /// Creates an empty snapshot stamped with `taken_at`.
    pub fn with_time(taken_at: Instant) -> Self {
        Self {
            records: BTreeMap::new(),
            taken_at,
        }
    }

    /// Builds a snapshot from records, stamped with the current instant.
    pub fn from_records(records: impl IntoIterator<Item = FileRecord>) -> Self {
        let mut snapshot = Self::empty();
        for record in records {
            snapshot.insert(record);
        }
        snapshot
    }

    /// Returns the instant the scan producing this snapshot started.
    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }

    /// Returns the record for `path`.
    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.records.get(path)
    }

    /// Returns true if `path` is present.
    pub fn contains(&self, path: &str) -> bool {
        self.records.contains_key(path)
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if there are no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates records in path order.
    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    /// Iterates paths in order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Returns true if both snapshots hold the same paths with equal records.
    pub fn converged_with(&self, other: &Snapshot) -> bool {
        self.records.len() == other.records.len()
            && self
                .records
                .iter()
                .all(|(path, record)| other.get(path) == Some(record))
    }

    /// Returns a copy with `record` inserted.
    ///
    /// The copy keeps `taken_at`: a single-path update says nothing about
    /// the rest of the tree.
    #[must_use]
    pub fn with_record(&self, record: FileRecord) -> Self {
        let mut next = self.clone();
        next.insert(record);
        next
    }

    /// Returns a copy with `path` removed, keeping `taken_at`.
    #[must_use]
    pub fn without(&self, path: &str) -> Self {
        let mut next = self.clone();
        next.remove(path);
        next
    }

    pub(crate) fn insert(&mut self, record: FileRecord) {
        self.records.insert(record.relative_path.clone(), record);
    }

    pub(crate) fn remove(&mut self, path: &str) -> Option<FileRecord> {
        self.records.remove(path)
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Publication point for an endpoint's latest snapshot.
///
/// Readers take an `Arc` to a fully-formed snapshot; the owner swaps in a
/// replacement. The lock only guards the pointer swap.
#[derive(Debug, Default)]
pub struct SnapshotCell {
    current: RwLock<Arc<Snapshot>>,
}

impl SnapshotCell {
    /// Creates a cell holding `snapshot`.
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Returns the current snapshot.
    pub fn load(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    /// Replaces the current snapshot.
    pub fn publish(&self, snapshot: Snapshot) {
        *self.current.write() = Arc::new(snapshot);
    }

    /// Replaces the current snapshot with `f(current)` atomically.
    pub fn update(&self, f: impl FnOnce(&Snapshot) -> Snapshot) {
        let mut current = self.current.write();
        let next = f(&current);
        *current = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(path: &str, secs: u64, content: &[u8]) -> FileRecord {
        FileRecord::new(
            path,
            SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
            Fingerprint::of_bytes(content),
        )
    }

    #[test]
    fn record_equality_needs_both_fields() {
        assert_eq!(record("a", 1, b"x"), record("a", 1, b"x"));
        assert_ne!(record("a", 1, b"x"), record("a", 2, b"x"));
        assert_ne!(record("a", 1, b"x"), record("a", 1, b"y"));
    }

    #[test]
    fn snapshot_lookup_and_order() {
        let snapshot = Snapshot::from_records([record("b", 1, b"b"), record("a", 1, b"a")]);
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains("a"));
        assert_eq!(snapshot.paths().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn with_and_without_leave_original_untouched() {
        let original = Snapshot::from_records([record("a", 1, b"a")]);
        let added = original.with_record(record("b", 1, b"b"));
        let removed = original.without("a");

        assert_eq!(original.len(), 1);
        assert_eq!(added.len(), 2);
        assert!(removed.is_empty());
        assert_eq!(added.taken_at(), original.taken_at());
        assert_eq!(removed.taken_at(), original.taken_at());
    }

    #[test]
    fn convergence_check() {
        let a = Snapshot::from_records([record("a", 1, b"a"), record("b", 2, b"b")]);
        let b = Snapshot::from_records([record("b", 2, b"b"), record("a", 1, b"a")]);
        assert!(a.converged_with(&b));

        let c = b.with_record(record("a", 3, b"a"));
        assert!(!a.converged_with(&c));
        assert!(!a.converged_with(&b.without("b")));
    }

    #[test]
    fn cell_readers_keep_old_instance() {
        let cell = SnapshotCell::new(Snapshot::from_records([record("a", 1, b"a")]));
        let before = cell.load();

        cell.publish(Snapshot::empty());
        assert_eq!(before.len(), 1);
        assert!(cell.load().is_empty());

        cell.update(|s| s.with_record(record("z", 1, b"z")));
        assert!(cell.load().contains("z"));
    }
}
