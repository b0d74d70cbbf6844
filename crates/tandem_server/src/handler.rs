//! Applies one inbound request to the local tree.

use crate::error::{ServerError, ServerResult};
use std::io::{self, Read, Write};
use std::sync::Arc;
use tandem_engine::{Endpoint, FileRecord, PeerLedger, PeerView};
use tandem_protocol::{validate_relative_path, ProtocolError, Request, Status, SyncEntry};
use tracing::{debug, info, warn};

/// Handler for one connection: one request, one status per file.
///
/// Every request gets a response, including rejected ones. When a payload
/// cannot be consumed in full the stream is out of step, so the handler
/// answers `ERROR:` and gives up on the connection.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    endpoint: Endpoint,
    ledger: Option<Arc<PeerLedger>>,
}

impl RequestHandler {
    /// Creates a handler writing into `endpoint`.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ledger: None,
        }
    }

    /// Records every applied request in `ledger`, the local view of what
    /// the sending peer holds.
    pub fn with_ledger(mut self, ledger: Arc<PeerLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Returns the endpoint requests are applied to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Reads one request from `reader` and answers on `writer`.
    ///
    /// Returns the statuses sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be read to its end or the
    /// response cannot be written.
    pub fn handle<R: Read, W: Write>(
        &self,
        reader: &mut R,
        writer: &mut W,
    ) -> ServerResult<Vec<Status>> {
        let request = match Request::read_from(reader) {
            Ok(request) => request,
            Err(e) => {
                reply(writer, &Status::Error(e.to_string()))?;
                return Err(e.into());
            }
        };
        debug!(command = request.tag(), "request");

        match request {
            Request::Sync { file_count } => {
                let mut statuses = Vec::with_capacity(file_count.min(1024) as usize);
                for _ in 0..file_count {
                    let status = self.receive_entry(reader, writer)?;
                    statuses.push(status);
                }
                Ok(statuses)
            }
            Request::Delete { name } => {
                let status = self.delete(&name);
                reply(writer, &status)?;
                Ok(vec![status])
            }
        }
    }

    fn receive_entry<R: Read, W: Write>(&self, reader: &mut R, writer: &mut W) -> ServerResult<Status> {
        let entry = match SyncEntry::read_from(reader) {
            Ok(entry) => entry,
            Err(e) => return fail(writer, e.into()),
        };

        if let Err(e) = entry.validate() {
            warn!(name = %entry.name, error = %e, "rejected file");
            let drained = io::copy(&mut reader.by_ref().take(entry.size), &mut io::sink())?;
            if drained < entry.size {
                let short = ProtocolError::ShortRead {
                    expected: entry.size,
                    received: drained,
                };
                return fail(writer, short.into());
            }
            let status = Status::Error(e.to_string());
            reply(writer, &status)?;
            return Ok(status);
        }

        match self.endpoint.receive(&entry.name, reader, entry.size) {
            Ok(record) => {
                info!(name = %entry.name, size = entry.size, "received");
                self.observe(&entry.name, Some(record));
                let status = Status::Received(entry.name);
                reply(writer, &status)?;
                Ok(status)
            }
            Err(e) => {
                warn!(name = %entry.name, error = %e, "receive failed");
                fail(writer, e.into())
            }
        }
    }

    fn delete(&self, name: &str) -> Status {
        if let Err(e) = validate_relative_path(name) {
            warn!(name, error = %e, "rejected delete");
            return Status::Error(e.to_string());
        }
        match self.endpoint.remove(name) {
            Ok(true) => {
                info!(name, "deleted");
                self.observe(name, None);
                Status::Deleted(name.to_string())
            }
            Ok(false) => {
                debug!(name, "delete of missing file");
                self.observe(name, None);
                Status::NotFound(name.to_string())
            }
            Err(e) => {
                warn!(name, error = %e, "delete failed");
                Status::Error(e.to_string())
            }
        }
    }

    fn observe(&self, name: &str, record: Option<FileRecord>) {
        if let Some(ledger) = &self.ledger {
            ledger.observe(name, record);
        }
    }
}

fn reply<W: Write>(writer: &mut W, status: &Status) -> ServerResult<()> {
    status.write_to(writer)?;
    writer.flush()?;
    Ok(())
}

/// Sends `ERROR:` for a failure that leaves the stream unusable.
fn fail<W: Write>(writer: &mut W, error: ServerError) -> ServerResult<Status> {
    if let Err(e) = reply(writer, &Status::Error(error.to_string())) {
        debug!(error = %e, "could not report failure");
    }
    Err(error)
}
