//! State shared by every session.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use filedeck_fs::FileOperationService;
use metrics::gauge;

use crate::config::ServerConfig;
use crate::metrics::WATCHERS_ACTIVE;
use crate::websocket::broadcast::BroadcastGroup;

/// Dependencies handed to each [`ConnectionSession`](crate::websocket::session::ConnectionSession).
#[derive(Debug)]
pub struct SessionContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Confined file operations.
    pub files: Arc<FileOperationService>,
    /// Process-wide broadcast groups.
    pub group: Arc<BroadcastGroup>,
    active_watchers: AtomicUsize,
}

impl SessionContext {
    /// Build a context with a fresh broadcast registry.
    pub fn new(config: ServerConfig, files: FileOperationService) -> Self {
        Self {
            config,
            files: Arc::new(files),
            group: Arc::new(BroadcastGroup::new()),
            active_watchers: AtomicUsize::new(0),
        }
    }

    /// Running watchers across all sessions.
    pub fn active_watchers(&self) -> usize {
        self.active_watchers.load(Ordering::Relaxed)
    }

    /// Record a watcher transition for one session.
    pub fn watcher_transition(&self, was_running: bool, is_running: bool) {
        match (was_running, is_running) {
            (false, true) => {
                let _ = self.active_watchers.fetch_add(1, Ordering::Relaxed);
                gauge!(WATCHERS_ACTIVE).increment(1.0);
            }
            (true, false) => {
                let _ = self.active_watchers.fetch_sub(1, Ordering::Relaxed);
                gauge!(WATCHERS_ACTIVE).decrement(1.0);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filedeck_fs::PathGuard;

    #[test]
    fn watcher_transitions_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileOperationService::new(PathGuard::new(dir.path()).unwrap());
        let ctx = SessionContext::new(ServerConfig::default(), files);

        ctx.watcher_transition(false, true);
        ctx.watcher_transition(false, true);
        ctx.watcher_transition(true, true);
        assert_eq!(ctx.active_watchers(), 2);
        ctx.watcher_transition(true, false);
        ctx.watcher_transition(false, false);
        assert_eq!(ctx.active_watchers(), 1);
    }
}
