//! Sync coordinators: detect, reconcile, apply, publish.

use crate::config::SyncConfig;
use crate::diff::{diff_event, diff_with_history, DiffOutcome, History, Side, SyncAction};
use crate::endpoint::Endpoint;
use crate::error::{SyncResult, TransferError};
use crate::peer::PeerView;
use crate::scan::PollDetector;
use crate::shutdown::Shutdown;
use crate::snapshot::{FileRecord, Snapshot, SnapshotCell};
use crate::transfer::{Ack, TransferChannel};
use crate::watch::{RawEvent, WatchDetector};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What a coordinator is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Waiting for the next cycle.
    Idle,
    /// Scanning the local tree.
    Detecting,
    /// Applying actions.
    Applying,
    /// Waiting for filesystem events.
    Watching,
    /// The run loop has ended.
    Stopped,
}

/// Cumulative statistics of one coordinator.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorStats {
    /// Detection cycles (or watch events) processed.
    pub cycles_completed: u64,
    /// Actions acknowledged by the channel.
    pub actions_applied: u64,
    /// Actions that failed.
    pub actions_failed: u64,
    /// Local changes recognised as echoes of inbound actions.
    pub echoes_suppressed: u64,
    /// Same-timestamp conflicts left alone.
    pub conflicts_unresolved: u64,
    /// When the last cycle finished.
    pub last_cycle_time: Option<Instant>,
    /// Last cycle or action error.
    pub last_error: Option<String>,
}

/// Result of one detection cycle or one watch event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Files in the fresh local view.
    pub scanned: usize,
    /// Actions acknowledged.
    pub applied: usize,
    /// Actions that failed.
    pub failed: usize,
    /// Local changes skipped as echoes.
    pub suppressed: usize,
    /// Actions skipped because the target changed after it was observed.
    pub superseded: usize,
    /// Paths left alone because both sides changed at the same instant.
    pub unresolved: Vec<String>,
}

impl CycleReport {
    /// Returns true if the cycle changed nothing and found nothing to report.
    pub fn is_quiet(&self) -> bool {
        self.applied == 0
            && self.failed == 0
            && self.suppressed == 0
            && self.superseded == 0
            && self.unresolved.is_empty()
    }
}

/// An action applied to the peer that the peer's snapshot may not show yet.
///
/// Retired once the peer publishes a different record for the path than
/// it showed when the action was applied, or a full scan started after it.
#[derive(Debug, Clone)]
struct Pending {
    record: Option<FileRecord>,
    before: Option<FileRecord>,
    applied_at: Instant,
}

#[derive(Debug)]
struct CycleState {
    baseline: Arc<Snapshot>,
    peer_previous: Arc<Snapshot>,
    overlay: BTreeMap<String, Pending>,
}

/// Poll-mode coordinator for one direction of a pair.
///
/// Each cycle scans the local tree, reconciles it against the peer view
/// and the previous cycle, skips echoes, applies the remaining actions in
/// order and publishes the resulting local snapshot for the peer.
pub struct PollCoordinator {
    name: String,
    endpoint: Endpoint,
    detector: PollDetector,
    own: Arc<SnapshotCell>,
    peer: Arc<dyn PeerView>,
    channel: Arc<dyn TransferChannel>,
    config: SyncConfig,
    state: RwLock<CoordinatorState>,
    stats: RwLock<CoordinatorStats>,
    cycle: Mutex<CycleState>,
}

impl PollCoordinator {
    /// Creates a coordinator publishing into `own`.
    pub fn new(
        name: impl Into<String>,
        endpoint: Endpoint,
        own: Arc<SnapshotCell>,
        peer: Arc<dyn PeerView>,
        channel: Arc<dyn TransferChannel>,
        config: SyncConfig,
    ) -> Self {
        let detector = PollDetector::new(endpoint.root());
        let cycle = CycleState {
            baseline: own.load(),
            peer_previous: peer.last_known(),
            overlay: BTreeMap::new(),
        };
        Self {
            name: name.into(),
            endpoint,
            detector,
            own,
            peer,
            channel,
            config,
            state: RwLock::new(CoordinatorState::Idle),
            stats: RwLock::new(CoordinatorStats::default()),
            cycle: Mutex::new(cycle),
        }
    }

    /// Returns the coordinator name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the local endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the cell this coordinator publishes into.
    pub fn snapshot_cell(&self) -> &Arc<SnapshotCell> {
        &self.own
    }

    /// Returns the current state.
    pub fn state(&self) -> CoordinatorState {
        *self.state.read()
    }

    /// Returns a copy of the statistics.
    pub fn stats(&self) -> CoordinatorStats {
        self.stats.read().clone()
    }

    fn set_state(&self, state: CoordinatorState) {
        *self.state.write() = state;
    }

    /// Scans the local tree and publishes it without reconciling.
    ///
    /// Both sides of a pair are primed before either starts cycling, so
    /// the first reconciliation sees both trees.
    pub fn prime(&self) -> SyncResult<()> {
        let snapshot = Arc::new(self.detector.detect()?);
        self.own.publish((*snapshot).clone());

        let mut cycle = self.cycle.lock();
        cycle.baseline = snapshot;
        cycle.peer_previous = self.peer.last_known();
        info!(coordinator = %self.name, files = cycle.baseline.len(), "primed");
        Ok(())
    }

    /// Runs one detection cycle.
    ///
    /// # Errors
    ///
    /// Returns an error only if detection fails. Failed actions are counted
    /// in the report and retried on a later cycle.
    pub fn run_cycle(&self) -> SyncResult<CycleReport> {
        let mut cycle = self.cycle.lock();

        self.set_state(CoordinatorState::Detecting);
        let new = match self.detector.detect() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.set_state(CoordinatorState::Idle);
                self.record_error(&e.to_string());
                return Err(e.into());
            }
        };

        let peer = self.effective_peer(&mut cycle);
        let baseline = Arc::clone(&cycle.baseline);
        let history = History::new(&baseline, &cycle.peer_previous);
        let outcome = diff_with_history(&new, &peer, &history);

        let echoes = self.consume_echoes(&baseline, &new);
        let mut report = CycleReport {
            scanned: new.len(),
            suppressed: echoes.len(),
            ..CycleReport::default()
        };

        self.set_state(CoordinatorState::Applying);
        let mut published = new;
        self.apply(outcome, &echoes, &baseline, &peer, &mut published, &mut cycle, &mut report);

        let published = Arc::new(published);
        self.own.publish((*published).clone());
        cycle.baseline = published;
        let peer_now = self.effective_peer(&mut cycle);
        cycle.peer_previous = peer_now;
        drop(cycle);

        self.finish_cycle(&report);
        self.set_state(CoordinatorState::Idle);
        Ok(report)
    }

    /// Runs cycles until `shutdown` fires, sleeping `poll_interval` between them.
    pub fn run(&self, shutdown: &Shutdown) {
        info!(
            coordinator = %self.name,
            root = ?self.endpoint.root(),
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "poll coordinator started"
        );
        while !shutdown.is_cancelled() {
            match self.run_cycle() {
                Ok(report) if report.is_quiet() => {
                    debug!(coordinator = %self.name, scanned = report.scanned, "cycle idle")
                }
                Ok(report) => info!(
                    coordinator = %self.name,
                    applied = report.applied,
                    failed = report.failed,
                    suppressed = report.suppressed,
                    superseded = report.superseded,
                    unresolved = report.unresolved.len(),
                    "cycle complete"
                ),
                Err(e) => error!(coordinator = %self.name, error = %e, "cycle failed"),
            }
            if shutdown.wait_timeout(self.config.poll_interval) {
                break;
            }
        }
        self.set_state(CoordinatorState::Stopped);
        info!(coordinator = %self.name, "poll coordinator stopped");
    }

    /// Handles one watch event: diff the path, apply, update the snapshot.
    fn handle_event(&self, event: &RawEvent) -> CycleReport {
        let mut cycle = self.cycle.lock();
        let path = event.path.as_str();
        let mut report = CycleReport {
            scanned: 1,
            ..CycleReport::default()
        };

        let local = match self.endpoint.record(path) {
            Ok(record) => record,
            Err(e) => {
                warn!(coordinator = %self.name, path, error = %e, "cannot read changed file");
                self.record_error(&e.to_string());
                return report;
            }
        };

        let baseline = Arc::clone(&cycle.baseline);
        let mut published = match &local {
            Some(record) => baseline.with_record(record.clone()),
            None => baseline.without(path),
        };

        if self.endpoint.suppressor().should_suppress(path) {
            debug!(coordinator = %self.name, path, "echo suppressed");
            report.suppressed = 1;
        } else {
            let peer = self.effective_peer(&mut cycle);
            let outcome = diff_event(event, local.as_ref(), &peer);
            self.apply(
                outcome,
                &BTreeSet::new(),
                &baseline,
                &peer,
                &mut published,
                &mut cycle,
                &mut report,
            );
        }

        let published = Arc::new(published);
        self.own.publish((*published).clone());
        cycle.baseline = published;
        let peer_now = self.effective_peer(&mut cycle);
        cycle.peer_previous = peer_now;
        drop(cycle);

        self.finish_cycle(&report);
        report
    }

    /// The peer's snapshot with our not-yet-visible actions laid over it.
    fn effective_peer(&self, cycle: &mut CycleState) -> Arc<Snapshot> {
        let peer = self.peer.last_known();
        cycle.overlay.retain(|path, pending| {
            pending.applied_at > peer.taken_at() && peer.get(path) == pending.before.as_ref()
        });
        if cycle.overlay.is_empty() {
            return peer;
        }

        let mut view = (*peer).clone();
        for (path, pending) in &cycle.overlay {
            match &pending.record {
                Some(record) => view.insert(record.clone()),
                None => {
                    view.remove(path);
                }
            }
        }
        Arc::new(view)
    }

    /// Consumes suppression entries for every path that changed locally.
    fn consume_echoes(&self, baseline: &Snapshot, new: &Snapshot) -> BTreeSet<String> {
        let suppressor = self.endpoint.suppressor();
        let changed = new
            .iter()
            .filter(|record| baseline.get(&record.relative_path) != Some(*record))
            .map(|record| record.relative_path.as_str())
            .chain(baseline.paths().filter(|path| !new.contains(path)));

        let mut echoes = BTreeSet::new();
        for path in changed {
            if suppressor.should_suppress(path) {
                debug!(coordinator = %self.name, path, "echo suppressed");
                echoes.insert(path.to_string());
            }
        }
        suppressor.purge_expired();
        echoes
    }

    #[allow(clippy::too_many_arguments)]
    fn apply(
        &self,
        outcome: DiffOutcome,
        echoes: &BTreeSet<String>,
        baseline: &Snapshot,
        peer: &Snapshot,
        published: &mut Snapshot,
        cycle: &mut CycleState,
        report: &mut CycleReport,
    ) {
        for path in &outcome.unresolved {
            warn!(coordinator = %self.name, path = %path, "same timestamp, different content; left alone");
        }
        report.unresolved = outcome.unresolved;

        for action in outcome.actions {
            if echoes.contains(action.path()) {
                continue;
            }
            let expected = match action.target() {
                Side::Peer => peer.get(action.path()).cloned(),
                Side::Local => published.get(action.path()).cloned(),
            };
            match self.channel.send_expecting(&action, expected.as_ref()) {
                Ok(Ack::Superseded(current)) => {
                    debug!(coordinator = %self.name, action = %action, "target changed; skipped");
                    report.superseded += 1;
                    if action.target() == Side::Peer {
                        self.note_peer(action.path(), current, cycle);
                    }
                }
                Ok(ack) => {
                    info!(coordinator = %self.name, action = %action, "applied");
                    report.applied += 1;
                    self.record_success(&action, ack, published, cycle);
                }
                Err(e) => {
                    warn!(coordinator = %self.name, action = %action, error = %e, "action failed");
                    report.failed += 1;
                    self.record_error(&e.to_string());
                    self.record_failure(&action, &e, baseline, published);
                }
            }
        }
    }

    fn record_success(
        &self,
        action: &SyncAction,
        ack: Ack,
        published: &mut Snapshot,
        cycle: &mut CycleState,
    ) {
        let path = action.path();
        let record = match ack {
            Ack::Copied(record) => Some(record),
            Ack::Deleted | Ack::NotFound | Ack::Superseded(_) => None,
        };

        match action.target() {
            Side::Peer => self.note_peer(path, record, cycle),
            Side::Local => {
                match record {
                    Some(record) => published.insert(record),
                    None => {
                        published.remove(path);
                    }
                }
                // Already reflected in the published snapshot.
                self.endpoint.suppressor().clear(path);
            }
        }
    }

    /// Remembers what the peer holds for `path` until its snapshot shows it.
    fn note_peer(&self, path: &str, record: Option<FileRecord>, cycle: &mut CycleState) {
        let before = self.peer.last_known().get(path).cloned();
        self.peer.observe(path, record.clone());
        cycle.overlay.insert(
            path.to_string(),
            Pending {
                record,
                before,
                applied_at: Instant::now(),
            },
        );
    }

    fn record_failure(
        &self,
        action: &SyncAction,
        error: &TransferError,
        baseline: &Snapshot,
        published: &mut Snapshot,
    ) {
        // Keep the deleted record so the next cycle still sees a local
        // deletion and retries it.
        if let SyncAction::DeleteAt { path, at: Side::Peer } = action {
            if let Some(record) = baseline.get(path) {
                published.insert(record.clone());
            }
        }
        if !error.is_retryable() {
            debug!(coordinator = %self.name, action = %action, "will fail again until the trees change");
        }
    }

    fn record_error(&self, message: &str) {
        self.stats.write().last_error = Some(message.to_string());
    }

    fn finish_cycle(&self, report: &CycleReport) {
        let mut stats = self.stats.write();
        stats.cycles_completed += 1;
        stats.actions_applied += report.applied as u64;
        stats.actions_failed += report.failed as u64;
        stats.echoes_suppressed += report.suppressed as u64;
        stats.conflicts_unresolved += report.unresolved.len() as u64;
        stats.last_cycle_time = Some(Instant::now());
    }
}

impl std::fmt::Debug for PollCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollCoordinator")
            .field("name", &self.name)
            .field("root", &self.endpoint.root())
            .field("state", &self.state())
            .finish()
    }
}

/// Watch-mode coordinator.
///
/// Reconciles once with a full scan, then reacts to filesystem events one
/// path at a time.
#[derive(Debug)]
pub struct WatchCoordinator {
    poll: Arc<PollCoordinator>,
    detector: WatchDetector,
}

impl WatchCoordinator {
    /// Wraps a poll coordinator; its watch settings come from its config.
    pub fn new(poll: Arc<PollCoordinator>) -> Self {
        let detector = WatchDetector::new(poll.endpoint.root(), poll.config.watch.clone());
        Self { poll, detector }
    }

    /// Returns the underlying coordinator.
    pub fn inner(&self) -> &Arc<PollCoordinator> {
        &self.poll
    }

    /// Handles one event. Exposed for driving the coordinator by hand.
    pub fn handle_event(&self, event: &RawEvent) -> CycleReport {
        let report = self.poll.handle_event(event);
        if report.applied > 0 || report.failed > 0 {
            info!(
                coordinator = %self.poll.name,
                path = %event.path,
                kind = ?event.kind,
                applied = report.applied,
                failed = report.failed,
                "event handled"
            );
        }
        report
    }

    /// Subscribes, reconciles once, then handles events until `shutdown`
    /// fires or the notification backend goes away.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be established.
    /// Detection errors on individual events are logged and skipped.
    pub fn run(&self, shutdown: &Shutdown) -> SyncResult<()> {
        // Subscribe first so nothing changed during the initial scan is missed.
        let stream = self.detector.subscribe(shutdown)?;
        if let Err(e) = self.poll.run_cycle() {
            error!(coordinator = %self.poll.name, error = %e, "initial reconcile failed");
        }

        self.poll.set_state(CoordinatorState::Watching);
        for item in stream {
            match item {
                Ok(event) => {
                    self.handle_event(&event);
                }
                Err(e) => {
                    warn!(coordinator = %self.poll.name, error = %e, "detection error");
                    self.poll.record_error(&e.to_string());
                }
            }
        }

        self.poll.set_state(CoordinatorState::Stopped);
        info!(coordinator = %self.poll.name, "watch coordinator stopped");
        Ok(())
    }
}
