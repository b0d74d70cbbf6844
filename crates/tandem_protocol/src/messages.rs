//! Protocol messages.
//!
//! A request starts with a command string, decoded straight into
//! [`Request`]. `SYNC` carries a file count followed by that many
//! [`SyncEntry`] headers, each immediately followed by its payload bytes.
//! `DELETE` carries one file name. The receiver answers with one
//! [`Status`] string per file.

use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{copy_exact, read_string, read_u32, read_u64, write_string, write_u32, write_u64};
use crate::path::validate_relative_path;
use std::fmt;
use std::io::{Read, Write};

/// Wire tag of the sync command.
pub const SYNC_TAG: &str = "SYNC";

/// Wire tag of the delete command.
pub const DELETE_TAG: &str = "DELETE";

/// A decoded request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Push whole files; `file_count` entries follow.
    Sync {
        /// Number of [`SyncEntry`] frames that follow.
        file_count: u32,
    },
    /// Delete one file.
    Delete {
        /// Relative path of the file to delete.
        name: String,
    },
}

impl Request {
    /// Creates a sync request header.
    pub fn sync(file_count: u32) -> Self {
        Request::Sync { file_count }
    }

    /// Creates a delete request.
    pub fn delete(name: impl Into<String>) -> Self {
        Request::Delete { name: name.into() }
    }

    /// Returns the wire tag for this request.
    pub fn tag(&self) -> &'static str {
        match self {
            Request::Sync { .. } => SYNC_TAG,
            Request::Delete { .. } => DELETE_TAG,
        }
    }

    /// Reads the command and its fixed body.
    ///
    /// For `SYNC` this consumes the file count only; entries are read with
    /// [`SyncEntry::read_from`].
    ///
    /// # Errors
    ///
    /// Returns `UnknownCommand` for any tag other than `SYNC` or `DELETE`.
    pub fn read_from<R: Read>(reader: &mut R) -> ProtocolResult<Self> {
        let command = read_string(reader)?;
        match command.as_str() {
            SYNC_TAG => Ok(Request::Sync {
                file_count: read_u32(reader)?,
            }),
            DELETE_TAG => Ok(Request::Delete {
                name: read_string(reader)?,
            }),
            _ => Err(ProtocolError::UnknownCommand(command)),
        }
    }

    /// Writes the command and its fixed body.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> ProtocolResult<()> {
        write_string(writer, self.tag())?;
        match self {
            Request::Sync { file_count } => write_u32(writer, *file_count),
            Request::Delete { name } => write_string(writer, name),
        }
    }
}

/// Header of one file inside a `SYNC` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEntry {
    /// Relative path of the file.
    pub name: String,
    /// Exact payload length in bytes.
    pub size: u64,
}

impl SyncEntry {
    /// Creates a new entry header.
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }

    /// Checks that the name is a safe relative path.
    pub fn validate(&self) -> ProtocolResult<()> {
        validate_relative_path(&self.name)
    }

    /// Reads an entry header. The payload is left unread on the stream.
    pub fn read_from<R: Read>(reader: &mut R) -> ProtocolResult<Self> {
        let name = read_string(reader)?;
        let size = read_u64(reader)?;
        Ok(Self { name, size })
    }

    /// Writes the entry header only.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> ProtocolResult<()> {
        write_string(writer, &self.name)?;
        write_u64(writer, self.size)
    }

    /// Writes the header followed by exactly `size` bytes from `payload`.
    ///
    /// # Errors
    ///
    /// Returns `ShortRead` if `payload` ends before `size` bytes.
    pub fn write_with_payload<W: Write, R: Read + ?Sized>(
        &self,
        writer: &mut W,
        payload: &mut R,
    ) -> ProtocolResult<()> {
        self.write_to(writer)?;
        copy_exact(payload, writer, self.size)?;
        Ok(())
    }
}

/// Receiver response for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// The file was written in full.
    Received(String),
    /// The file was deleted.
    Deleted(String),
    /// The file to delete did not exist.
    NotFound(String),
    /// The receiver rejected the request.
    Error(String),
}

impl Status {
    const RECEIVED: &'static str = "RECEIVED";
    const DELETED: &'static str = "DELETED";
    const NOT_FOUND: &'static str = "NOT_FOUND";
    const ERROR: &'static str = "ERROR";

    /// Returns the name or message carried after the prefix.
    pub fn detail(&self) -> &str {
        match self {
            Status::Received(s) | Status::Deleted(s) | Status::NotFound(s) | Status::Error(s) => s,
        }
    }

    /// Returns true for every status except `Error`.
    pub fn is_success(&self) -> bool {
        !matches!(self, Status::Error(_))
    }

    /// Parses a status string such as `RECEIVED:notes.txt`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStatus` if the prefix is unknown or the separator is missing.
    pub fn parse(raw: &str) -> ProtocolResult<Self> {
        let (prefix, detail) = raw
            .split_once(':')
            .ok_or_else(|| ProtocolError::InvalidStatus(raw.to_string()))?;
        let detail = detail.to_string();
        match prefix {
            Self::RECEIVED => Ok(Status::Received(detail)),
            Self::DELETED => Ok(Status::Deleted(detail)),
            Self::NOT_FOUND => Ok(Status::NotFound(detail)),
            Self::ERROR => Ok(Status::Error(detail)),
            _ => Err(ProtocolError::InvalidStatus(raw.to_string())),
        }
    }

    /// Reads one status frame.
    pub fn read_from<R: Read>(reader: &mut R) -> ProtocolResult<Self> {
        let raw = read_string(reader)?;
        Self::parse(&raw)
    }

    /// Writes one status frame.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> ProtocolResult<()> {
        write_string(writer, &self.to_string())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self {
            Status::Received(_) => Self::RECEIVED,
            Status::Deleted(_) => Self::DELETED,
            Status::NotFound(_) => Self::NOT_FOUND,
            Status::Error(_) => Self::ERROR,
        };
        write!(f, "{}:{}", prefix, self.detail())
    }
}
