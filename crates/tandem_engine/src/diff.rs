//! Diff engine: turns a fresh view of one endpoint into sync actions.
//!
//! Conflicts are resolved last-writer-wins on modification time at whole
//! file granularity. Two records with the same timestamp but different
//! content are left alone and reported as unresolved.

use crate::snapshot::{FileRecord, Snapshot};
use crate::watch::RawEvent;
use std::cmp::Ordering;
use std::fmt;

/// One side of a sync pair, relative to the coordinator emitting an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The endpoint owned by the emitting coordinator.
    Local,
    /// The other endpoint.
    Peer,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Local => f.write_str("local"),
            Side::Peer => f.write_str("peer"),
        }
    }
}

/// A single change to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Copy `path` from one side to the other.
    CopyTo {
        /// Relative path.
        path: String,
        /// Side holding the winning version.
        from: Side,
        /// Side to overwrite.
        to: Side,
    },
    /// Delete `path` on one side.
    DeleteAt {
        /// Relative path.
        path: String,
        /// Side to delete from.
        at: Side,
    },
}

impl SyncAction {
    /// Copy from the local side to the peer.
    pub fn push(path: impl Into<String>) -> Self {
        SyncAction::CopyTo {
            path: path.into(),
            from: Side::Local,
            to: Side::Peer,
        }
    }

    /// Copy from the peer to the local side.
    pub fn pull(path: impl Into<String>) -> Self {
        SyncAction::CopyTo {
            path: path.into(),
            from: Side::Peer,
            to: Side::Local,
        }
    }

    /// Delete on the peer.
    pub fn delete_at_peer(path: impl Into<String>) -> Self {
        SyncAction::DeleteAt {
            path: path.into(),
            at: Side::Peer,
        }
    }

    /// Returns the relative path the action touches.
    pub fn path(&self) -> &str {
        match self {
            SyncAction::CopyTo { path, .. } | SyncAction::DeleteAt { path, .. } => path,
        }
    }

    /// Returns the side the action mutates.
    pub fn target(&self) -> Side {
        match self {
            SyncAction::CopyTo { to, .. } => *to,
            SyncAction::DeleteAt { at, .. } => *at,
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::CopyTo { path, from, to } => write!(f, "copy {} {} -> {}", path, from, to),
            SyncAction::DeleteAt { path, at } => write!(f, "delete {} at {}", path, at),
        }
    }
}

/// Result of a diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffOutcome {
    /// Actions in application order: additions, modifications, deletions.
    pub actions: Vec<SyncAction>,
    /// Paths whose records differ but carry the same timestamp.
    pub unresolved: Vec<String>,
}

impl DiffOutcome {
    /// Returns true if there is nothing to apply or report.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.unresolved.is_empty()
    }
}

/// What both sides looked like at the previous reconciliation.
///
/// A missing snapshot disables the corresponding guard.
#[derive(Debug, Clone, Copy, Default)]
pub struct History<'a> {
    /// The local snapshot from the previous cycle.
    pub local_previous: Option<&'a Snapshot>,
    /// The peer view used in the previous cycle.
    pub peer_previous: Option<&'a Snapshot>,
}

impl<'a> History<'a> {
    /// No history: the plain rules apply.
    pub fn none() -> Self {
        Self::default()
    }

    /// History from both previous views.
    pub fn new(local_previous: &'a Snapshot, peer_previous: &'a Snapshot) -> Self {
        Self {
            local_previous: Some(local_previous),
            peer_previous: Some(peer_previous),
        }
    }

    /// The peer used to hold `path` and no longer does, and we did not touch it.
    fn peer_deleted(&self, path: &str, local: &FileRecord) -> bool {
        match (self.local_previous, self.peer_previous) {
            (Some(local_prev), Some(peer_prev)) => {
                peer_prev.contains(path) && local_prev.get(path) == Some(local)
            }
            _ => false,
        }
    }

    /// `path` is missing locally because it was deleted here, and the peer
    /// has not changed it since.
    fn local_deleted(&self, path: &str, peer: &FileRecord) -> bool {
        let deleted_here = self.local_previous.map_or(true, |prev| prev.contains(path));
        let peer_untouched = self
            .peer_previous
            .map_or(true, |prev| prev.get(path) == Some(peer));
        deleted_here && peer_untouched
    }
}

/// Compares a fresh local snapshot with the peer's last known snapshot.
///
/// 1. present locally, absent at the peer: copy to the peer;
/// 2. present on both with unequal records: the newer modification time
///    wins, equal times are left unresolved;
/// 3. absent locally, present at the peer: delete at the peer.
pub fn diff(new: &Snapshot, peer: &Snapshot) -> Vec<SyncAction> {
    diff_with_history(new, peer, &History::none()).actions
}

/// [`diff`] guarded by what both sides looked like last time.
///
/// Lets two coordinators reconcile the same pair concurrently:
/// - a file the peer deleted is not copied back;
/// - a delete only propagates when the file was deleted here and the peer
///   has not modified it since (a modification beats a delete).
pub fn diff_with_history(new: &Snapshot, peer: &Snapshot, history: &History<'_>) -> DiffOutcome {
    let mut builder = OutcomeBuilder::default();

    for local in new.iter() {
        let path = local.relative_path.as_str();
        match peer.get(path) {
            None if history.peer_deleted(path, local) => {}
            None => builder.add(SyncAction::push(path)),
            Some(remote) => builder.compare(path, local, remote),
        }
    }

    for remote in peer.iter() {
        let path = remote.relative_path.as_str();
        if !new.contains(path) && history.local_deleted(path, remote) {
            builder.delete(SyncAction::delete_at_peer(path));
        }
    }

    builder.finish()
}

/// Applies the same rules to a single watch event.
///
/// `local` is the record read after the event, `None` if the file is gone.
pub fn diff_event(event: &RawEvent, local: Option<&FileRecord>, peer: &Snapshot) -> DiffOutcome {
    let mut builder = OutcomeBuilder::default();
    let path = event.path.as_str();

    // The record read after the event is authoritative: a delete event for a
    // file that was immediately recreated is a modification.
    match local {
        Some(local) => match peer.get(path) {
            None => builder.add(SyncAction::push(path)),
            Some(remote) => builder.compare(path, local, remote),
        },
        None => {
            if peer.contains(path) {
                builder.delete(SyncAction::delete_at_peer(path));
            }
        }
    }

    builder.finish()
}

#[derive(Default)]
struct OutcomeBuilder {
    additions: Vec<SyncAction>,
    modifications: Vec<SyncAction>,
    deletions: Vec<SyncAction>,
    unresolved: Vec<String>,
}

impl OutcomeBuilder {
    fn add(&mut self, action: SyncAction) {
        self.additions.push(action);
    }

    fn delete(&mut self, action: SyncAction) {
        self.deletions.push(action);
    }

    fn compare(&mut self, path: &str, local: &FileRecord, remote: &FileRecord) {
        if local == remote {
            return;
        }
        match local.modified_at.cmp(&remote.modified_at) {
            Ordering::Greater => self.modifications.push(SyncAction::push(path)),
            Ordering::Less => self.modifications.push(SyncAction::pull(path)),
            Ordering::Equal => self.unresolved.push(path.to_string()),
        }
    }

    fn finish(mut self) -> DiffOutcome {
        for group in [&mut self.additions, &mut self.modifications, &mut self.deletions] {
            group.sort_by(|a, b| a.path().cmp(b.path()));
        }
        self.unresolved.sort();

        let mut actions = self.additions;
        actions.append(&mut self.modifications);
        actions.append(&mut self.deletions);
        DiffOutcome {
            actions,
            unresolved: self.unresolved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Fingerprint;
    use crate::watch::EventKind;
    use std::time::{Duration, SystemTime};

    fn record(path: &str, secs: u64, content: &[u8]) -> FileRecord {
        FileRecord::new(
            path,
            SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
            Fingerprint::of_bytes(content),
        )
    }

    fn snap(records: &[FileRecord]) -> Snapshot {
        Snapshot::from_records(records.iter().cloned())
    }

    #[test]
    fn plain_rules() {
        let local = snap(&[record("new", 1, b"n"), record("both", 5, b"v2")]);
        let peer = snap(&[record("both", 3, b"v1"), record("gone", 1, b"g")]);

        assert_eq!(
            diff(&local, &peer),
            vec![
                SyncAction::push("new"),
                SyncAction::push("both"),
                SyncAction::delete_at_peer("gone"),
            ]
        );
    }

    #[test]
    fn peer_newer_pulls() {
        let local = snap(&[record("f", 1, b"old")]);
        let peer = snap(&[record("f", 2, b"new")]);
        assert_eq!(diff(&local, &peer), vec![SyncAction::pull("f")]);
    }

    #[test]
    fn identical_records_produce_nothing() {
        let local = snap(&[record("f", 1, b"x")]);
        let peer = snap(&[record("f", 1, b"x")]);
        assert!(diff_with_history(&local, &peer, &History::none()).is_empty());
    }

    #[test]
    fn equal_timestamp_conflict_is_noop() {
        let local = snap(&[record("f", 7, b"left")]);
        let peer = snap(&[record("f", 7, b"right")]);

        let outcome = diff_with_history(&local, &peer, &History::none());
        assert!(outcome.actions.is_empty());
        assert_eq!(outcome.unresolved, vec!["f".to_string()]);

        let reverse = diff_with_history(&peer, &local, &History::none());
        assert!(reverse.actions.is_empty());
        assert_eq!(reverse.unresolved, vec!["f".to_string()]);
    }

    #[test]
    fn tie_break_is_deterministic_from_both_sides() {
        let a = snap(&[record("f", 10, b"a-wins")]);
        let b = snap(&[record("f", 9, b"b-loses")]);

        // Both directions agree that A's content ends up on both sides.
        for _ in 0..10 {
            assert_eq!(diff(&a, &b), vec![SyncAction::push("f")]);
            assert_eq!(diff(&b, &a), vec![SyncAction::pull("f")]);
        }
    }

    #[test]
    fn groups_are_sorted_and_ordered() {
        let local = snap(&[
            record("z-add", 1, b"1"),
            record("a-add", 1, b"1"),
            record("m-mod", 9, b"new"),
            record("b-mod", 9, b"new"),
        ]);
        let peer = snap(&[
            record("m-mod", 1, b"old"),
            record("b-mod", 1, b"old"),
            record("y-del", 1, b"1"),
            record("c-del", 1, b"1"),
        ]);

        let paths: Vec<_> = diff(&local, &peer)
            .iter()
            .map(|a| a.path().to_string())
            .collect();
        assert_eq!(paths, ["a-add", "z-add", "b-mod", "m-mod", "c-del", "y-del"]);
    }

    #[test]
    fn history_skips_copy_back_of_peer_deletion() {
        let kept = record("f", 1, b"x");
        let local = snap(&[kept.clone()]);
        let local_prev = snap(&[kept.clone()]);
        let peer_prev = snap(&[kept]);
        let peer = Snapshot::empty();

        let outcome = diff_with_history(&local, &peer, &History::new(&local_prev, &peer_prev));
        assert!(outcome.is_empty());
    }

    #[test]
    fn history_still_pushes_new_local_file() {
        let local = snap(&[record("f", 1, b"x")]);
        let empty = Snapshot::empty();

        let outcome = diff_with_history(&local, &empty, &History::new(&empty, &empty));
        assert_eq!(outcome.actions, vec![SyncAction::push("f")]);
    }

    #[test]
    fn history_does_not_delete_unseen_peer_file() {
        let empty = Snapshot::empty();
        let peer = snap(&[record("theirs", 1, b"x")]);

        let outcome = diff_with_history(&empty, &peer, &History::new(&empty, &empty));
        assert!(outcome.is_empty());
    }

    #[test]
    fn local_delete_propagates() {
        let rec = record("f", 1, b"x");
        let local_prev = snap(&[rec.clone()]);
        let peer = snap(&[rec.clone()]);
        let peer_prev = snap(&[rec]);

        let outcome = diff_with_history(
            &Snapshot::empty(),
            &peer,
            &History::new(&local_prev, &peer_prev),
        );
        assert_eq!(outcome.actions, vec![SyncAction::delete_at_peer("f")]);
    }

    #[test]
    fn modify_beats_delete() {
        let local_prev = snap(&[record("f", 1, b"x")]);
        let peer_prev = snap(&[record("f", 1, b"x")]);
        let peer = snap(&[record("f", 2, b"edited")]);

        let outcome = diff_with_history(
            &Snapshot::empty(),
            &peer,
            &History::new(&local_prev, &peer_prev),
        );
        assert!(outcome.actions.is_empty());
    }

    #[test]
    fn event_diff() {
        let peer = snap(&[record("f", 1, b"old"), record("g", 1, b"g")]);

        let modified = RawEvent::new(EventKind::Modified, "f");
        let outcome = diff_event(&modified, Some(&record("f", 2, b"new")), &peer);
        assert_eq!(outcome.actions, vec![SyncAction::push("f")]);

        let created = RawEvent::new(EventKind::Created, "h");
        let outcome = diff_event(&created, Some(&record("h", 1, b"h")), &peer);
        assert_eq!(outcome.actions, vec![SyncAction::push("h")]);

        let deleted = RawEvent::new(EventKind::Deleted, "g");
        let outcome = diff_event(&deleted, None, &peer);
        assert_eq!(outcome.actions, vec![SyncAction::delete_at_peer("g")]);

        let unknown = RawEvent::new(EventKind::Deleted, "never-synced");
        assert!(diff_event(&unknown, None, &peer).is_empty());

        let echo = RawEvent::new(EventKind::Modified, "g");
        assert!(diff_event(&echo, Some(&record("g", 1, b"g")), &peer).is_empty());
    }
}
