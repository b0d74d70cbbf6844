//! Error types for the receiver.

use std::net::SocketAddr;
use tandem_engine::TransferError;
use tandem_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the receiver.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Could not bind the listening socket.
    #[error("cannot bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed or truncated request.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Applying a request to the local tree failed.
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if the peer sent something this server cannot read.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::Protocol(_)
                | ServerError::Transfer(TransferError::ShortRead { .. })
                | ServerError::Transfer(TransferError::InvalidPath(_))
        )
    }
}
