//! Client half of the wire protocol: pushes local changes to a networked peer.

use crate::diff::{Side, SyncAction};
use crate::endpoint::Endpoint;
use crate::error::{TransferError, TransferResult};
use crate::scan::read_record;
use crate::transfer::{Ack, TransferChannel};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tandem_protocol::{Request, Status, SyncEntry};
use tracing::{debug, trace};

/// Channel to a peer reachable over TCP.
///
/// Opens one connection per action. The protocol can push files and
/// deletes to the peer but cannot fetch from it, so pulls are rejected;
/// the peer pushes its own changes.
#[derive(Debug, Clone)]
pub struct RemoteChannel {
    addr: String,
    local: Endpoint,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl RemoteChannel {
    /// Creates a channel pushing files from `local` to the peer at `addr`.
    pub fn new(addr: impl Into<String>, local: Endpoint) -> Self {
        Self {
            addr: addr.into(),
            local,
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the connect and read/write timeouts.
    pub fn with_timeouts(mut self, connect: Duration, io: Duration) -> Self {
        self.connect_timeout = connect;
        self.io_timeout = io;
        self
    }

    /// Returns the peer address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn connect(&self) -> TransferResult<TcpStream> {
        let connect_err = |source| TransferError::Connect {
            addr: self.addr.clone(),
            source,
        };
        let mut last_error = None;
        for addr in self.addr.to_socket_addrs().map_err(connect_err)? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.io_timeout))?;
                    stream.set_write_timeout(Some(self.io_timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(connect_err(last_error.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "address resolved to nothing")
        })))
    }

    fn push_file(&self, path: &str) -> TransferResult<Ack> {
        let full = self.local.resolve(path)?;
        let record = read_record(&full, path)?;
        let mut file = File::open(&full)?;
        let size = file.metadata()?.len();

        let stream = self.connect()?;
        {
            let mut writer = BufWriter::new(&stream);
            Request::sync(1).write_to(&mut writer)?;
            SyncEntry::new(path, size).write_with_payload(&mut writer, &mut file)?;
            writer.flush()?;
        }
        trace!(path, size, peer = %self.addr, "file sent");

        match Status::read_from(&mut BufReader::new(&stream))? {
            Status::Received(_) => Ok(Ack::Copied(record)),
            status => Err(unexpected(path, status)),
        }
    }

    fn push_delete(&self, path: &str) -> TransferResult<Ack> {
        let stream = self.connect()?;
        {
            let mut writer = BufWriter::new(&stream);
            Request::delete(path).write_to(&mut writer)?;
            writer.flush()?;
        }

        match Status::read_from(&mut BufReader::new(&stream))? {
            Status::Deleted(_) => Ok(Ack::Deleted),
            Status::NotFound(_) => Ok(Ack::NotFound),
            status => Err(unexpected(path, status)),
        }
    }
}

impl TransferChannel for RemoteChannel {
    fn send(&self, action: &SyncAction) -> TransferResult<Ack> {
        let ack = match action {
            SyncAction::CopyTo {
                path,
                from: Side::Local,
                to: Side::Peer,
            } => self.push_file(path)?,
            SyncAction::DeleteAt {
                path,
                at: Side::Peer,
            } => self.push_delete(path)?,
            other => return Err(TransferError::Unsupported(other.to_string())),
        };
        debug!(action = %action, peer = %self.addr, "acknowledged");
        Ok(ack)
    }
}

fn unexpected(path: &str, status: Status) -> TransferError {
    match status {
        Status::Error(message) => TransferError::Rejected {
            path: path.to_string(),
            message,
        },
        other => TransferError::Rejected {
            path: path.to_string(),
            message: format!("unexpected response {}", other),
        },
    }
}
