//! # Tandem Engine
//!
//! Bidirectional synchronization of two file trees.
//!
//! This crate provides:
//! - Content fingerprints and immutable per-endpoint snapshots
//! - Change detection by periodic scan or filesystem notifications
//! - A last-writer-wins diff engine
//! - Echo suppression so applied changes do not bounce back
//! - Transfer channels for co-located trees and for a peer over TCP
//! - Poll and watch coordinators, and a runner for two local trees
//!
//! ## Architecture
//!
//! Each direction of a pair has its own coordinator. A coordinator owns one
//! local [`Endpoint`], publishes that endpoint's [`Snapshot`] into a
//! [`SnapshotCell`], reads the other side through a [`PeerView`] and sends
//! [`SyncAction`]s through a [`TransferChannel`]:
//!
//! 1. detect: scan the tree (or take one watch event)
//! 2. reconcile: diff against the peer view and the previous cycle
//! 3. skip echoes of changes the peer just applied here
//! 4. apply actions in order: additions, modifications, deletions
//! 5. publish the resulting snapshot
//!
//! ## Key Invariants
//!
//! - A published snapshot is never mutated
//! - Records are equal iff modification time and fingerprint both match
//! - Same-timestamp, different-content conflicts are left alone
//! - An inbound change is never propagated back to its origin
//! - A failed action never aborts the rest of its cycle

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod diff;
mod digest;
mod echo;
mod endpoint;
mod error;
mod pair;
mod peer;
mod remote;
mod scan;
mod shutdown;
mod snapshot;
mod transfer;
mod watch;

pub use config::{SyncConfig, WatchConfig};
pub use coordinator::{
    CoordinatorState, CoordinatorStats, CycleReport, PollCoordinator, WatchCoordinator,
};
pub use diff::{diff, diff_event, diff_with_history, DiffOutcome, History, Side, SyncAction};
pub use digest::Fingerprint;
pub use echo::EchoSuppressor;
pub use endpoint::Endpoint;
pub use error::{
    DetectionError, DetectionResult, SyncError, SyncResult, TransferError, TransferResult,
};
pub use pair::{DetectionMode, LocalPair, PairHandle};
pub use peer::{PeerLedger, PeerView};
pub use remote::RemoteChannel;
pub use scan::{is_transfer_temp, read_record, relative_path, PollDetector, TEMP_PREFIX};
pub use shutdown::Shutdown;
pub use snapshot::{FileRecord, Snapshot, SnapshotCell};
pub use transfer::{Ack, LocalChannel, MockChannel, TransferChannel};
pub use watch::{EventKind, EventStream, RawEvent, WatchDetector};
