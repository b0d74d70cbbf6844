//! Two co-located trees mirrored by one coordinator per direction.

use crate::config::SyncConfig;
use crate::coordinator::{CoordinatorStats, CycleReport, PollCoordinator, WatchCoordinator};
use crate::echo::EchoSuppressor;
use crate::endpoint::Endpoint;
use crate::error::{SyncError, SyncResult};
use crate::shutdown::Shutdown;
use crate::snapshot::SnapshotCell;
use crate::transfer::LocalChannel;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// How a running pair detects changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
    /// Full scan every poll interval.
    Poll,
    /// Filesystem notifications after one initial scan.
    Watch,
}

/// Mirrors directory `a` and directory `b` in both directions.
#[derive(Debug)]
pub struct LocalPair {
    a: Arc<PollCoordinator>,
    b: Arc<PollCoordinator>,
}

impl LocalPair {
    /// Builds both coordinators, creating the roots if needed.
    pub fn new(a: impl Into<PathBuf>, b: impl Into<PathBuf>, config: SyncConfig) -> io::Result<Self> {
        let ttl = config.suppression_ttl;
        let endpoint_a = Endpoint::new(a, Arc::new(EchoSuppressor::new(ttl)));
        let endpoint_b = Endpoint::new(b, Arc::new(EchoSuppressor::new(ttl)));
        endpoint_a.ensure_root()?;
        endpoint_b.ensure_root()?;

        let cell_a = Arc::new(SnapshotCell::default());
        let cell_b = Arc::new(SnapshotCell::default());

        let a = PollCoordinator::new(
            "a->b",
            endpoint_a.clone(),
            Arc::clone(&cell_a),
            cell_b.clone(),
            Arc::new(LocalChannel::new(endpoint_a.clone(), endpoint_b.clone())),
            config.clone(),
        );
        let b = PollCoordinator::new(
            "b->a",
            endpoint_b.clone(),
            Arc::clone(&cell_b),
            cell_a,
            Arc::new(LocalChannel::new(endpoint_b, endpoint_a)),
            config,
        );

        Ok(Self {
            a: Arc::new(a),
            b: Arc::new(b),
        })
    }

    /// Returns the coordinator pushing from `a` to `b`.
    pub fn a(&self) -> &Arc<PollCoordinator> {
        &self.a
    }

    /// Returns the coordinator pushing from `b` to `a`.
    pub fn b(&self) -> &Arc<PollCoordinator> {
        &self.b
    }

    /// Scans and publishes both trees.
    pub fn prime(&self) -> SyncResult<()> {
        self.a.prime()?;
        self.b.prime()
    }

    /// Runs one cycle in each direction, `a` first.
    pub fn run_cycle(&self) -> SyncResult<(CycleReport, CycleReport)> {
        let from_a = self.a.run_cycle()?;
        let from_b = self.b.run_cycle()?;
        Ok((from_a, from_b))
    }

    /// Primes both trees and starts one thread per direction.
    pub fn spawn(self, mode: DetectionMode, shutdown: &Shutdown) -> SyncResult<PairHandle> {
        self.prime()?;
        info!(
            a = ?self.a.endpoint().root(),
            b = ?self.b.endpoint().root(),
            mode = ?mode,
            "starting local pair"
        );

        let mut threads = Vec::with_capacity(2);
        for coordinator in [Arc::clone(&self.a), Arc::clone(&self.b)] {
            let shutdown = shutdown.clone();
            let name = format!("tandem-{}", coordinator.name());
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || run_direction(coordinator, mode, &shutdown))
                .map_err(|e| SyncError::Thread(e.to_string()))?;
            threads.push(handle);
        }

        Ok(PairHandle {
            a: self.a,
            b: self.b,
            threads,
        })
    }
}

fn run_direction(coordinator: Arc<PollCoordinator>, mode: DetectionMode, shutdown: &Shutdown) {
    match mode {
        DetectionMode::Poll => coordinator.run(shutdown),
        DetectionMode::Watch => {
            let name = coordinator.name().to_string();
            if let Err(e) = WatchCoordinator::new(coordinator).run(shutdown) {
                error!(coordinator = %name, error = %e, "watch coordinator failed");
            }
        }
    }
}

/// Handle to a running pair.
#[derive(Debug)]
pub struct PairHandle {
    a: Arc<PollCoordinator>,
    b: Arc<PollCoordinator>,
    threads: Vec<JoinHandle<()>>,
}

impl PairHandle {
    /// Returns the statistics of both directions.
    pub fn stats(&self) -> (CoordinatorStats, CoordinatorStats) {
        (self.a.stats(), self.b.stats())
    }

    /// Waits for both threads. Cancel the shutdown token first.
    pub fn join(self) -> SyncResult<()> {
        for handle in self.threads {
            let name = handle.thread().name().unwrap_or("tandem").to_string();
            handle
                .join()
                .map_err(|_| SyncError::Thread(format!("{} panicked", name)))?;
        }
        Ok(())
    }
}
