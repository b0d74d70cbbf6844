//! Watch mode change detection driven by filesystem notifications.

use crate::config::WatchConfig;
use crate::error::{DetectionError, DetectionResult};
use crate::scan::{is_transfer_temp, relative_path};
use crate::shutdown::Shutdown;
use notify::event::{ModifyKind, RemoveKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

/// Kind of a detected change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A file appeared.
    Created,
    /// A file's contents changed.
    Modified,
    /// A file disappeared.
    Deleted,
}

/// One change to one file, relative to the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Kind of change.
    pub kind: EventKind,
    /// Relative path, `/`-separated.
    pub path: String,
}

impl RawEvent {
    /// Creates a new event.
    pub fn new(kind: EventKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Subscribes to filesystem notifications under one root.
#[derive(Debug, Clone)]
pub struct WatchDetector {
    root: PathBuf,
    config: WatchConfig,
}

impl WatchDetector {
    /// Creates a detector for `root`.
    pub fn new(root: impl Into<PathBuf>, config: WatchConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// Returns the watched root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Starts a recursive watch and returns the event stream.
    ///
    /// The stream ends when `shutdown` is cancelled or the notification
    /// backend goes away. It cannot be restarted; subscribe again instead.
    ///
    /// # Errors
    ///
    /// Returns `RootUnavailable` if the root is not a directory, or `Watch`
    /// if the notification backend refuses the subscription.
    pub fn subscribe(&self, shutdown: &Shutdown) -> DetectionResult<EventStream> {
        if !self.root.is_dir() {
            return Err(DetectionError::RootUnavailable(self.root.clone()));
        }
        // Events are matched against the root by prefix, so resolve
        // symlinked roots (e.g. /tmp on macOS) up front.
        let root = fs::canonicalize(&self.root).map_err(|e| DetectionError::io(&self.root, e))?;

        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!(root = ?root, "watching for changes");

        Ok(EventStream {
            root,
            config: self.config.clone(),
            shutdown: shutdown.clone(),
            _watcher: watcher,
            rx,
            pending: VecDeque::new(),
            finished: false,
        })
    }
}

/// Infinite stream of stabilized change events.
///
/// Every `next()` call blocks until an event is ready, the shutdown token
/// fires, or the backend disconnects.
pub struct EventStream {
    root: PathBuf,
    config: WatchConfig,
    shutdown: Shutdown,
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<notify::Event>>,
    pending: VecDeque<(EventKind, PathBuf)>,
    finished: bool,
}

impl EventStream {
    fn enqueue(&mut self, event: &notify::Event) {
        for change in map_event(event) {
            if !self.pending.contains(&change) {
                self.pending.push_back(change);
            }
        }
    }

    /// Turns one queued change into an event, or `None` if it should be dropped.
    fn resolve(&mut self, kind: EventKind, path: PathBuf) -> Option<DetectionResult<RawEvent>> {
        let relative = relative_path(&self.root, &path)?;
        if is_transfer_temp(&relative) {
            return None;
        }
        if kind == EventKind::Deleted {
            return Some(Ok(RawEvent::new(kind, relative)));
        }

        match stabilize(&path, &self.config, &self.shutdown) {
            Ok(Stability::Stable) => Some(Ok(RawEvent::new(kind, relative))),
            Ok(Stability::Directory) => {
                self.expand_directory(&path);
                None
            }
            Ok(Stability::Vanished) => {
                debug!(path = %relative, "file vanished while stabilizing");
                Some(Ok(RawEvent::new(EventKind::Deleted, relative)))
            }
            Ok(Stability::Unstable(attempts)) => Some(Err(DetectionError::Unstable {
                path: relative,
                attempts,
            })),
            Ok(Stability::Cancelled) => None,
            Err(e) => Some(Err(DetectionError::io(path, e))),
        }
    }

    /// Files inside a newly created directory may predate the kernel watch on it.
    fn expand_directory(&mut self, dir: &Path) {
        for entry in WalkDir::new(dir).follow_links(false).into_iter().flatten() {
            if entry.file_type().is_file() {
                let change = (EventKind::Created, entry.into_path());
                if !self.pending.contains(&change) {
                    self.pending.push_back(change);
                }
            }
        }
    }
}

impl Iterator for EventStream {
    type Item = DetectionResult<RawEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            if let Some((kind, path)) = self.pending.pop_front() {
                match self.resolve(kind, path) {
                    Some(item) => return Some(item),
                    None => continue,
                }
            }
            if self.shutdown.is_cancelled() {
                self.finished = true;
                return None;
            }

            match self.rx.recv_timeout(self.config.event_timeout) {
                Ok(Ok(event)) => {
                    trace!(?event, "notification");
                    self.enqueue(&event);
                }
                Ok(Err(e)) => return Some(Err(e.into())),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(root = ?self.root, "watch channel closed");
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("root", &self.root)
            .field("pending", &self.pending.len())
            .field("finished", &self.finished)
            .finish()
    }
}

/// Maps one notification onto per-path changes.
///
/// Renames become a delete of the old name and a create of the new one.
/// Directory creates are kept so the stream can expand them; access events
/// and directory removals are dropped.
pub(crate) fn map_event(event: &notify::Event) -> Vec<(EventKind, PathBuf)> {
    use notify::EventKind as Kind;

    let each = |kind: EventKind| -> Vec<(EventKind, PathBuf)> {
        event.paths.iter().map(|p| (kind, p.clone())).collect()
    };

    match &event.kind {
        Kind::Create(_) => each(EventKind::Created),
        Kind::Modify(ModifyKind::Name(RenameMode::From)) => each(EventKind::Deleted),
        Kind::Modify(ModifyKind::Name(RenameMode::To)) => each(EventKind::Created),
        Kind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut changes = Vec::with_capacity(2);
            if let Some(from) = event.paths.first() {
                changes.push((EventKind::Deleted, from.clone()));
            }
            if let Some(to) = event.paths.get(1) {
                changes.push((EventKind::Created, to.clone()));
            }
            changes
        }
        // Backends that cannot pair rename halves report whichever side exists.
        Kind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                let kind = if p.exists() {
                    EventKind::Created
                } else {
                    EventKind::Deleted
                };
                (kind, p.clone())
            })
            .collect(),
        Kind::Modify(_) | Kind::Any => each(EventKind::Modified),
        Kind::Remove(RemoveKind::Folder) => Vec::new(),
        Kind::Remove(_) => each(EventKind::Deleted),
        Kind::Access(_) | Kind::Other => Vec::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stability {
    Stable,
    Directory,
    Vanished,
    Unstable(u32),
    Cancelled,
}

/// Waits until `path` has a non-zero size that holds for one debounce interval.
pub(crate) fn stabilize(
    path: &Path,
    config: &WatchConfig,
    shutdown: &Shutdown,
) -> io::Result<Stability> {
    let mut last_size = None;
    for _ in 0..config.stabilize_attempts {
        let size = match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => return Ok(Stability::Directory),
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Stability::Vanished),
            Err(e) => return Err(e),
        };
        if size > 0 && last_size == Some(size) {
            return Ok(Stability::Stable);
        }
        last_size = Some(size);
        if shutdown.wait_timeout(config.debounce) {
            return Ok(Stability::Cancelled);
        }
    }
    Ok(Stability::Unstable(config.stabilize_attempts))
}
