//! # Tandem Protocol
//!
//! Framed wire protocol used between two Tandem endpoints that do not share
//! a filesystem.
//!
//! This crate provides:
//! - Length-prefixed string and big-endian integer frames
//! - `SYNC` / `DELETE` requests decoded into a closed [`Request`] type
//! - Per-file [`SyncEntry`] headers and exact-length payload transfer
//! - [`Status`] responses (`RECEIVED:`, `DELETED:`, `NOT_FOUND:`, `ERROR:`)
//! - Relative path validation for names received from the network
//!
//! This is a pure protocol crate with no filesystem I/O. It works over any
//! `Read`/`Write` pair.
//!
//! ## Example
//!
//! ```rust
//! use std::io::Cursor;
//! use tandem_protocol::{Request, SyncEntry};
//!
//! let mut frame = Vec::new();
//! Request::sync(1).write_to(&mut frame).unwrap();
//! SyncEntry::new("notes.txt", 2)
//!     .write_with_payload(&mut frame, &mut Cursor::new(b"hi".to_vec()))
//!     .unwrap();
//!
//! let mut reader = Cursor::new(frame);
//! assert_eq!(Request::read_from(&mut reader).unwrap(), Request::sync(1));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod frame;
mod messages;
mod path;

pub use error::{ProtocolError, ProtocolResult};
pub use frame::{
    copy_exact, read_string, read_u32, read_u64, write_string, write_u32, write_u64,
    MAX_STRING_LEN,
};
pub use messages::{Request, Status, SyncEntry, DELETE_TAG, SYNC_TAG};
pub use path::{validate_relative_path, PATH_SEPARATOR, TEMP_PREFIX};
