//! Serve command implementation.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tandem_engine::{
    DetectionMode, EchoSuppressor, Endpoint, PeerLedger, PollCoordinator, RemoteChannel, Shutdown,
    SnapshotCell, SyncConfig, WatchCoordinator,
};
use tandem_server::{RequestHandler, ServerConfig, SyncServer};
use tracing::{error, info};

/// Options of one networked endpoint.
#[derive(Debug)]
pub struct ServeOptions<'a> {
    /// Tree to synchronize.
    pub root: &'a Path,
    /// Address the receiver listens on.
    pub listen: SocketAddr,
    /// Receiver address of the other endpoint.
    pub peer: String,
    /// Change detection strategy.
    pub mode: DetectionMode,
    /// Receiver worker threads.
    pub workers: usize,
}

/// Runs the receiver and a coordinator pushing local changes to the peer.
pub fn run(options: ServeOptions<'_>, config: SyncConfig) -> Result<(), Box<dyn std::error::Error>> {
    let suppressor = Arc::new(EchoSuppressor::new(config.suppression_ttl));
    let endpoint = Endpoint::new(options.root, suppressor);
    endpoint.ensure_root()?;

    // What the peer is believed to hold, fed by both directions.
    let ledger = Arc::new(PeerLedger::new());
    let shutdown = Shutdown::new();

    let handler = RequestHandler::new(endpoint.clone()).with_ledger(Arc::clone(&ledger));
    let server_config = ServerConfig::new(options.listen)
        .with_worker_threads(options.workers)
        .with_request_timeout(config.io_timeout);
    let server = SyncServer::bind(server_config, handler)?.spawn(&shutdown)?;
    info!(listen = %server.addr(), peer = %options.peer, "endpoint started");

    let channel = RemoteChannel::new(options.peer, endpoint.clone())
        .with_timeouts(config.connect_timeout, config.io_timeout);
    let coordinator = Arc::new(PollCoordinator::new(
        "push",
        endpoint,
        Arc::new(SnapshotCell::default()),
        ledger,
        Arc::new(channel),
        config,
    ));
    coordinator.prime()?;

    match options.mode {
        DetectionMode::Poll => coordinator.run(&shutdown),
        DetectionMode::Watch => {
            if let Err(e) = WatchCoordinator::new(coordinator).run(&shutdown) {
                error!(error = %e, "watch coordinator failed");
                shutdown.cancel();
            }
        }
    }

    server.join()?;
    Ok(())
}
