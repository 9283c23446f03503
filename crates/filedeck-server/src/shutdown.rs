//! Shutdown coordination: one root `CancellationToken` plus a tracker of the
//! session tasks that must finish their cleanup before the process exits.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TrackedFuture;
use tracing::{info, warn};

/// Default time allowed for sessions to drain.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates shutdown across the listener and all sessions.
///
/// Sessions derive their closing token from [`token`](Self::token) and run
/// inside [`track`](Self::track), so cancelling the root both asks every
/// session to close and lets [`drain`](Self::drain) wait for the watcher
/// threads to be joined.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the root token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wrap a session future so [`drain`](Self::drain) waits for it.
    pub fn track<F: Future>(&self, session: F) -> TrackedFuture<F> {
        self.sessions.track_future(session)
    }

    /// Session tasks still running.
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Stop accepting tracked sessions and wait for the running ones.
    pub async fn drain(&self) {
        let _ = self.sessions.close();
        self.sessions.wait().await;
    }

    /// Cancel the token, then wait up to `timeout` for the server task,
    /// which itself drains the sessions.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub async fn graceful_shutdown(&self, server: JoinHandle<()>, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        info!(
            open_sessions = self.open_sessions(),
            timeout_secs = timeout.as_secs(),
            "waiting for sessions to close"
        );

        match tokio::time::timeout(timeout, server).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "server task failed during shutdown");
                true
            }
            Err(_) => {
                warn!(
                    open_sessions = self.open_sessions(),
                    "shutdown timed out after {timeout:?}"
                );
                false
            }
        }
    }
}
