//! # Tandem Server
//!
//! Receiving half of the Tandem wire protocol.
//!
//! This crate provides:
//! - A TCP accept loop that stops on a shared [`Shutdown`](tandem_engine::Shutdown) token
//! - A bounded worker pool so one slow or failing peer cannot stall others
//! - A request handler writing inbound files and deletes into an
//!   [`Endpoint`](tandem_engine::Endpoint)
//!
//! # Protocol
//!
//! One request per connection:
//! 1. `SYNC` with N files, each answered by `RECEIVED:<name>`
//! 2. `DELETE <name>`, answered by `DELETED:<name>` or `NOT_FOUND:<name>`
//!
//! Anything the receiver refuses is answered by `ERROR:<message>`.
//!
//! Inbound writes mark the endpoint's echo suppressor, so the local
//! coordinator does not push them straight back. With a
//! [`PeerLedger`](tandem_engine::PeerLedger) attached, every applied
//! request also updates the local view of what the peer holds.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod pool;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::RequestHandler;
pub use pool::WorkerPool;
pub use server::{ServerHandle, SyncServer};
