//! Error types for the wire protocol.

use std::io;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An I/O error occurred on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream closed before a declared payload was fully delivered.
    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead {
        /// Number of bytes declared by the frame.
        expected: u64,
        /// Number of bytes actually received.
        received: u64,
    },

    /// The command tag is not one of the known commands.
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    /// A string does not fit in a 16-bit length prefix.
    #[error("string too long for frame: {len} bytes (max {max})")]
    StringTooLong {
        /// Encoded length of the string.
        len: usize,
        /// Maximum encodable length.
        max: usize,
    },

    /// A length-prefixed string was not valid UTF-8.
    #[error("invalid UTF-8 in string frame")]
    InvalidUtf8,

    /// A file name is not an acceptable relative path.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A response status string could not be parsed.
    #[error("invalid status: {0:?}")]
    InvalidStatus(String),
}

impl ProtocolError {
    /// Creates an invalid path error.
    pub fn invalid_path(path: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason,
        }
    }

    /// Returns true if the stream ended early (clean EOF or truncated payload).
    pub fn is_truncation(&self) -> bool {
        match self {
            ProtocolError::ShortRead { .. } => true,
            ProtocolError::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}
