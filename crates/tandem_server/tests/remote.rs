//! Round trips through a real server on an ephemeral port.

use filetime::FileTime;
use std::fs;
use std::io::{BufReader, Write};
use std::net::{Shutdown as SocketShutdown, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tandem_engine::{
    Ack, EchoSuppressor, Endpoint, PeerLedger, PeerView, PollCoordinator, RemoteChannel, Shutdown,
    SnapshotCell, SyncAction, SyncConfig, TransferChannel, TransferError,
};
use tandem_protocol::{Request, Status, SyncEntry};
use tandem_server::{RequestHandler, ServerConfig, ServerHandle, SyncServer};
use tempfile::{tempdir, TempDir};

/// One networked endpoint: a tree, its receiver and the ledger they share.
struct Node {
    dir: TempDir,
    endpoint: Endpoint,
    ledger: Arc<PeerLedger>,
    server: Option<ServerHandle>,
    shutdown: Shutdown,
}

impl Node {
    fn start() -> Self {
        let dir = tempdir().unwrap();
        let endpoint = Endpoint::new(dir.path(), Arc::new(EchoSuppressor::new(Duration::from_secs(30))));
        let ledger = Arc::new(PeerLedger::new());
        let handler = RequestHandler::new(endpoint.clone()).with_ledger(ledger.clone());
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap())
            .with_worker_threads(2)
            .with_accept_backoff(Duration::from_millis(10));
        let shutdown = Shutdown::new();
        let server = SyncServer::bind(config, handler).unwrap().spawn(&shutdown).unwrap();
        Self {
            dir,
            endpoint,
            ledger,
            server: Some(server),
            shutdown,
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn addr(&self) -> String {
        self.server.as_ref().unwrap().addr().to_string()
    }

    /// A channel pushing this node's files to `peer`.
    fn channel_to(&self, peer: &Node) -> RemoteChannel {
        RemoteChannel::new(peer.addr(), self.endpoint.clone())
            .with_timeouts(Duration::from_secs(2), Duration::from_secs(5))
    }

    /// The coordinator pushing this node's changes to `peer`.
    fn coordinator_to(&self, peer: &Node) -> PollCoordinator {
        PollCoordinator::new(
            format!("{:?}", self.root()),
            self.endpoint.clone(),
            Arc::new(SnapshotCell::default()),
            self.ledger.clone(),
            Arc::new(self.channel_to(peer)),
            SyncConfig::default(),
        )
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(server) = self.server.take() {
            let _ = server.join();
        }
    }
}

#[test]
fn pushed_file_arrives_intact() {
    let a = Node::start();
    let b = Node::start();
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    fs::create_dir_all(a.root().join("deep/dir")).unwrap();
    fs::write(a.root().join("deep/dir/blob.bin"), &payload).unwrap();

    let ack = a
        .channel_to(&b)
        .send(&SyncAction::push("deep/dir/blob.bin"))
        .unwrap();

    assert!(matches!(ack, Ack::Copied(_)));
    assert_eq!(fs::read(b.root().join("deep/dir/blob.bin")).unwrap(), payload);
    assert!(b.ledger.last_known().contains("deep/dir/blob.bin"));
}

#[test]
fn repeated_delete_reports_not_found() {
    let a = Node::start();
    let b = Node::start();
    fs::write(b.root().join("old.txt"), b"old").unwrap();
    let channel = a.channel_to(&b);

    let delete = SyncAction::delete_at_peer("old.txt");
    assert_eq!(channel.send(&delete).unwrap(), Ack::Deleted);
    assert!(!b.root().join("old.txt").exists());
    assert_eq!(channel.send(&delete).unwrap(), Ack::NotFound);
}

#[test]
fn truncated_upload_is_rejected_and_leaves_nothing() {
    let b = Node::start();
    let mut stream = TcpStream::connect(b.addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let mut frame = Vec::new();
    Request::sync(1).write_to(&mut frame).unwrap();
    SyncEntry::new("partial.bin", 1_000).write_to(&mut frame).unwrap();
    frame.extend_from_slice(&[1u8; 300]);
    stream.write_all(&frame).unwrap();
    stream.shutdown(SocketShutdown::Write).unwrap();

    let status = Status::read_from(&mut BufReader::new(&stream)).unwrap();
    assert!(matches!(status, Status::Error(_)), "got {}", status);
    assert!(!b.root().join("partial.bin").exists());
    assert_eq!(fs::read_dir(b.root()).unwrap().count(), 0);
}

#[test]
fn escaping_name_is_rejected_by_peer() {
    let b = Node::start();
    let mut stream = TcpStream::connect(b.addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let mut frame = Vec::new();
    Request::delete("../../etc/passwd").write_to(&mut frame).unwrap();
    stream.write_all(&frame).unwrap();

    let status = Status::read_from(&mut BufReader::new(&stream)).unwrap();
    assert!(matches!(status, Status::Error(_)));
}

#[test]
fn pull_is_not_expressible_over_the_wire() {
    let a = Node::start();
    let b = Node::start();
    let err = a.channel_to(&b).send(&SyncAction::pull("x")).unwrap_err();
    assert!(matches!(err, TransferError::Unsupported(_)));
}

#[test]
fn remote_pair_converges_without_echo() {
    let a = Node::start();
    let b = Node::start();
    let a_to_b = a.coordinator_to(&b);
    let b_to_a = b.coordinator_to(&a);
    a_to_b.prime().unwrap();
    b_to_a.prime().unwrap();

    // Created on A.
    fs::write(a.root().join("notes.txt"), b"hello").unwrap();
    assert_eq!(a_to_b.run_cycle().unwrap().applied, 1);
    assert_eq!(fs::read(b.root().join("notes.txt")).unwrap(), b"hello");

    // B sees the inbound file as an echo and sends nothing back.
    let report = b_to_a.run_cycle().unwrap();
    assert_eq!(report.suppressed, 1);
    assert_eq!(report.applied, 0);
    assert!(a_to_b.run_cycle().unwrap().is_quiet());
    assert!(b_to_a.run_cycle().unwrap().is_quiet());

    // Edited on B.
    fs::write(b.root().join("notes.txt"), b"hello world").unwrap();
    let later = FileTime::from_unix_time(FileTime::now().unix_seconds() + 60, 0);
    filetime::set_file_mtime(b.root().join("notes.txt"), later).unwrap();
    assert_eq!(b_to_a.run_cycle().unwrap().applied, 1);
    assert_eq!(fs::read(a.root().join("notes.txt")).unwrap(), b"hello world");
    assert_eq!(a_to_b.run_cycle().unwrap().applied, 0);

    // Deleted on A.
    fs::remove_file(a.root().join("notes.txt")).unwrap();
    assert_eq!(a_to_b.run_cycle().unwrap().applied, 1);
    assert!(!b.root().join("notes.txt").exists());
    let report = b_to_a.run_cycle().unwrap();
    assert_eq!(report.suppressed, 1);
    assert_eq!(report.applied, 0);
    assert!(b.ledger.is_empty());
    assert!(a.ledger.is_empty());
}
