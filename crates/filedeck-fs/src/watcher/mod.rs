//! Non-recursive OS file watching.
//!
//! The OS backend pushes raw events into a channel; a dedicated thread per
//! watch drains it, runs the [`EventNormalizer`] and invokes the
//! [`EventSink`]. The sink is only ever called from that thread, and
//! [`FileSystemWatcher::stop`] joins it, so no delivery can happen after
//! `stop` returns.

pub mod events;

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Instant;

use filedeck_core::ids::WatchId;
use filedeck_core::{ChangeEvent, WatchError};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

pub use events::{EventNormalizer, RENAME_WINDOW, TEMP_SUFFIXES, is_temp_path};

/// Receives normalized change events.
pub trait EventSink: Send + 'static {
    /// Handle one change. Called from the watch thread.
    fn deliver(&mut self, event: ChangeEvent);
}

impl<F> EventSink for F
where
    F: FnMut(ChangeEvent) + Send + 'static,
{
    fn deliver(&mut self, event: ChangeEvent) {
        self(event);
    }
}

/// Lifecycle state of a [`FileSystemWatcher`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatcherState {
    /// No watch active.
    Stopped,
    /// `start` is establishing the OS watch.
    Starting,
    /// Events are being delivered.
    Running,
}

enum WatchMsg {
    Raw(notify::Result<notify::Event>),
    Shutdown,
}

struct ActiveWatch {
    id: WatchId,
    path: PathBuf,
    backend: RecommendedWatcher,
    control: Sender<WatchMsg>,
    thread: JoinHandle<()>,
}

/// Watches a single directory for changes to its immediate children.
pub struct FileSystemWatcher {
    state: WatcherState,
    active: Option<ActiveWatch>,
}

impl Default for FileSystemWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FileSystemWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystemWatcher")
            .field("state", &self.state)
            .field("path", &self.path())
            .finish()
    }
}

impl FileSystemWatcher {
    /// A stopped watcher.
    pub fn new() -> Self {
        Self {
            state: WatcherState::Stopped,
            active: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Whether a watch is running.
    pub fn is_running(&self) -> bool {
        self.state == WatcherState::Running
    }

    /// The watched directory, if running.
    pub fn path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    /// Start watching `path` non-recursively, delivering changes to `sink`.
    pub fn start(&mut self, path: &Path, sink: impl EventSink) -> Result<(), WatchError> {
        if let Some(active) = &self.active {
            return Err(WatchError::AlreadyRunning {
                path: active.path.clone(),
            });
        }

        self.state = WatcherState::Starting;
        match Self::spawn(path, sink) {
            Ok(active) => {
                info!(watch_id = %active.id, path = %path.display(), "watch started");
                self.active = Some(active);
                self.state = WatcherState::Running;
                Ok(())
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "watch failed to start");
                self.state = WatcherState::Stopped;
                Err(e)
            }
        }
    }

    /// Stop watching. Idempotent; returns once the watch thread has exited.
    pub fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            self.state = WatcherState::Stopped;
            return;
        };

        drop(active.backend);
        let _ = active.control.send(WatchMsg::Shutdown);
        if active.thread.join().is_err() {
            error!(watch_id = %active.id, "watch thread panicked");
        }
        self.state = WatcherState::Stopped;
        info!(watch_id = %active.id, path = %active.path.display(), "watch stopped");
    }

    fn spawn(path: &Path, sink: impl EventSink) -> Result<ActiveWatch, WatchError> {
        let unavailable = |message: String| WatchError::WatchUnavailable {
            path: path.to_path_buf(),
            message,
        };

        if !path.is_dir() {
            return Err(unavailable("not an existing directory".to_string()));
        }

        let (tx, rx) = mpsc::channel();
        let raw_tx = tx.clone();
        let mut backend = notify::recommended_watcher(move |res| {
            let _ = raw_tx.send(WatchMsg::Raw(res));
        })
        .map_err(|e| unavailable(e.to_string()))?;
        backend
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| unavailable(e.to_string()))?;

        let id = WatchId::new();
        let thread_id = id.clone();
        let thread = std::thread::Builder::new()
            .name(format!("fs-watch-{}", id.short()))
            .spawn(move || run_loop(&thread_id, &rx, sink))
            .map_err(|e| unavailable(e.to_string()))?;

        Ok(ActiveWatch {
            id,
            path: path.to_path_buf(),
            backend,
            control: tx,
            thread,
        })
    }
}

impl Drop for FileSystemWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(id: &WatchId, rx: &Receiver<WatchMsg>, mut sink: impl EventSink) {
    let mut normalizer = EventNormalizer::new();
    loop {
        let msg = match normalizer.next_deadline() {
            Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match msg {
            Ok(WatchMsg::Raw(Ok(event))) => {
                for change in normalizer.push(&event, Instant::now()) {
                    sink.deliver(change);
                }
            }
            Ok(WatchMsg::Raw(Err(e))) => warn!(watch_id = %id, error = %e, "watch backend error"),
            Ok(WatchMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        for change in normalizer.expire(Instant::now()) {
            sink.deliver(change);
        }
    }
    debug!(watch_id = %id, "watch thread exiting");
}
