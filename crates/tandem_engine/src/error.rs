//! Error types for the sync engine.

use std::io;
use std::path::PathBuf;
use tandem_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for change detection.
pub type DetectionResult<T> = Result<T, DetectionError>;

/// Result type for applying actions through a transfer channel.
pub type TransferResult<T> = Result<T, TransferError>;

/// Errors raised while scanning or watching an endpoint.
#[derive(Error, Debug)]
pub enum DetectionError {
    /// I/O error while reading a file or directory.
    #[error("io error at {path:?}: {source}")]
    Io {
        /// Path being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The tree walk failed.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// The filesystem notification subscription failed.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// A file never settled to a stable, non-empty size.
    #[error("file {path:?} did not stabilize after {attempts} attempts")]
    Unstable {
        /// Relative path of the file.
        path: String,
        /// Number of size polls performed.
        attempts: u32,
    },

    /// The endpoint root is missing or not a directory.
    #[error("endpoint root unavailable: {0:?}")]
    RootUnavailable(PathBuf),
}

impl DetectionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while applying one action to a peer.
#[derive(Error, Debug)]
pub enum TransferError {
    /// Local I/O error (source unreadable, disk full, ...).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The payload ended before its declared size.
    #[error("short read for {path:?}: expected {expected} bytes, received {received}")]
    ShortRead {
        /// Relative path being transferred.
        path: String,
        /// Declared size.
        expected: u64,
        /// Bytes actually received.
        received: u64,
    },

    /// Wire protocol failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Could not connect to the peer.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        /// Peer address.
        addr: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The peer answered with an error status.
    #[error("peer rejected {path:?}: {message}")]
    Rejected {
        /// Relative path of the rejected action.
        path: String,
        /// Message returned by the peer.
        message: String,
    },

    /// The channel cannot express this action.
    #[error("unsupported action: {0}")]
    Unsupported(String),

    /// A relative path failed validation.
    #[error("invalid path {0:?}")]
    InvalidPath(String),
}

impl TransferError {
    /// Returns true if the action may succeed when attempted again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Io(_)
                | TransferError::ShortRead { .. }
                | TransferError::Connect { .. }
                | TransferError::Protocol(ProtocolError::Io(_))
                | TransferError::Protocol(ProtocolError::ShortRead { .. })
        )
    }
}

/// Errors that can occur at the coordinator level.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Change detection failed.
    #[error("detection error: {0}")]
    Detection(#[from] DetectionError),

    /// Applying an action failed.
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// A worker thread could not be started or joined.
    #[error("worker thread error: {0}")]
    Thread(String),
}

impl SyncError {
    /// Returns true if this error can be retried on the next cycle.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Detection(_) => true,
            SyncError::Transfer(e) => e.is_retryable(),
            SyncError::Thread(_) => false,
        }
    }
}
