//! Echo suppression.
//!
//! When a change received from the peer is applied to the local tree, the
//! local detector will observe it like any other edit. Without suppression
//! that observation is propagated back to the peer, which observes it
//! again, and so on forever.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Registry of paths that were just mutated by an inbound action.
///
/// Entries are one-shot: the first [`should_suppress`](Self::should_suppress)
/// hit consumes them. Entries older than the TTL never suppress and are
/// purged, so a missed local event cannot suppress a later genuine edit.
#[derive(Debug)]
pub struct EchoSuppressor {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl EchoSuppressor {
    /// Creates a suppressor whose entries expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the configured TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Records that `path` is about to be changed by an inbound action.
    pub fn mark_suppressed(&self, path: &str) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::purge_locked(&mut entries, now, self.ttl);
        entries.insert(path.to_string(), now);
    }

    /// Checks and consumes the entry for `path`.
    ///
    /// Returns true if the local change to `path` is an echo and must not
    /// be propagated.
    pub fn should_suppress(&self, path: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.remove(path) {
            Some(marked_at) => now.duration_since(marked_at) <= self.ttl,
            None => false,
        }
    }

    /// Drops the entry for `path` without consuming it as a hit.
    ///
    /// Used when the inbound action it was marked for did not change the tree.
    pub fn clear(&self, path: &str) {
        self.entries.lock().remove(path);
    }

    /// Drops every expired entry.
    pub fn purge_expired(&self) {
        let mut entries = self.entries.lock();
        Self::purge_locked(&mut entries, Instant::now(), self.ttl);
    }

    /// Returns the number of live entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn purge_locked(entries: &mut HashMap<String, Instant>, now: Instant, ttl: Duration) {
        entries.retain(|_, marked_at| now.duration_since(*marked_at) <= ttl);
    }
}
