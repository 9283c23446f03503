//! WebSocket session lifecycle: one client from upgrade through disconnect.
//!
//! A [`ConnectionSession`] owns the client's watcher and heartbeat and is
//! driven by [`run_ws_session`], which bridges it to the socket. A reader task
//! records liveness for every inbound frame and queues commands, which are
//! handled one at a time in arrival order so replies are never reordered.
//! Blocking filesystem work runs on the blocking pool while the reader keeps
//! the client alive.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use filedeck_core::{ChangeEvent, ConnectionId, ErrorCode};
use filedeck_fs::{EventSink, FileSystemWatcher};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::sync::{OwnedSemaphorePermit, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, warn};

use super::broadcast::DEFAULT_GROUP;
use super::connection::{ClientConnection, Outbound};
use super::handler::CommandError;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::context::SessionContext;
use crate::metrics::{FILE_CHANGES_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL};
use crate::protocol::ServerMessage;

/// How long the socket writer may keep flushing after the session closes.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Commands read from the socket but not yet dispatched.
const INBOUND_BUFFER: usize = 64;

/// Lifecycle of a [`ConnectionSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet announced.
    Connecting,
    /// Accepting commands.
    Open,
    /// Tearing down the heartbeat, watcher and group membership.
    Closing,
    /// Fully released.
    Closed,
}

/// Per-client session state.
pub struct ConnectionSession {
    pub(super) ctx: Arc<SessionContext>,
    pub(super) connection: Arc<ClientConnection>,
    state: SessionState,
    pub(super) watcher: FileSystemWatcher,
    pub(super) watched_path: Option<PathBuf>,
    heartbeat: Option<(CancellationToken, JoinHandle<HeartbeatResult>)>,
    closing: CancellationToken,
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("id", &self.connection.id)
            .field("state", &self.state)
            .field("watched_path", &self.watched_path)
            .finish_non_exhaustive()
    }
}

impl ConnectionSession {
    /// A session in [`SessionState::Connecting`].
    ///
    /// Cancelling `closing` (or a parent of it) asks the socket loop to end.
    pub fn new(
        ctx: Arc<SessionContext>,
        connection: Arc<ClientConnection>,
        closing: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            connection,
            state: SessionState::Connecting,
            watcher: FileSystemWatcher::new(),
            watched_path: None,
            heartbeat: None,
            closing,
        }
    }

    /// Connection ID.
    pub fn id(&self) -> &ConnectionId {
        &self.connection.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Directory currently watched.
    pub fn watched_path(&self) -> Option<&Path> {
        self.watched_path.as_deref()
    }

    /// Token cancelled when the session should close.
    pub fn closing_token(&self) -> CancellationToken {
        self.closing.clone()
    }

    /// Join the default group, start the heartbeat and the watcher, and
    /// acknowledge the connection.
    ///
    /// A watcher that fails to start is reported to the client; the session
    /// still opens.
    pub async fn open(&mut self) {
        if self.state != SessionState::Connecting {
            return;
        }
        self.ctx
            .group
            .join(DEFAULT_GROUP, Arc::clone(&self.connection))
            .await;
        self.start_heartbeat();

        let initial = self.ctx.config.watch_path.clone();
        let watch_result = self.watch(&initial).await;

        let _ = self.connection.send_message(&ServerMessage::ConnectionStatus {
            status: "connected".into(),
            message: "Connected to filedeck file manager".into(),
            connection_id: self.connection.id.clone(),
            watching: self.watched_path.as_ref().map(|p| p.display().to_string()),
        });
        if let Err(e) = watch_result {
            warn!(conn_id = %self.connection.id, error = %e, "initial watch failed");
            self.send_error(&e, None);
        }

        self.state = SessionState::Open;
        info!(conn_id = %self.connection.id, "session open");
    }

    /// Cancel the heartbeat, stop the watcher, and leave the group.
    ///
    /// Returns only after the watch thread has been joined. Idempotent.
    pub async fn close(&mut self) {
        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            return;
        }
        self.state = SessionState::Closing;

        if let Some((cancel, handle)) = self.heartbeat.take() {
            cancel.cancel();
            match handle.await {
                Ok(result) => debug!(conn_id = %self.connection.id, ?result, "heartbeat finished"),
                Err(e) => warn!(conn_id = %self.connection.id, error = %e, "heartbeat task failed"),
            }
        }

        if let Err(e) = self.stop_watch().await {
            warn!(conn_id = %self.connection.id, error = %e, "watcher stop failed");
        }

        self.ctx.group.leave(DEFAULT_GROUP, &self.connection.id).await;
        self.state = SessionState::Closed;
        info!(conn_id = %self.connection.id, "session closed");
    }

    fn start_heartbeat(&mut self) {
        let cancel = self.closing.child_token();
        let connection = Arc::clone(&self.connection);
        let closing = self.closing.clone();
        let interval = self.ctx.config.heartbeat_interval;
        let timeout = self.ctx.config.heartbeat_timeout;
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = run_heartbeat(connection, interval, timeout, token).await;
            if result == HeartbeatResult::TimedOut {
                warn!("client unresponsive, closing session");
                closing.cancel();
            }
            result
        });
        self.heartbeat = Some((cancel, handle));
    }

    /// Resolve `requested` and (re)start the watcher on it.
    pub(super) async fn watch(&mut self, requested: &str) -> Result<PathBuf, CommandError> {
        let files = Arc::clone(&self.ctx.files);
        let requested = requested.to_string();
        let sink = watch_sink(Arc::clone(&self.connection));
        let mut watcher = std::mem::take(&mut self.watcher);
        let was_running = watcher.is_running();

        let (watcher, result) = tokio::task::spawn_blocking(move || {
            let result = files
                .guard()
                .resolve(&requested)
                .map_err(CommandError::from)
                .and_then(|dir| {
                    watcher.stop();
                    watcher.start(&dir, sink).map(|()| dir).map_err(CommandError::from)
                });
            (watcher, result)
        })
        .await?;

        self.ctx.watcher_transition(was_running, watcher.is_running());
        if !watcher.is_running() {
            self.watched_path = None;
        }
        self.watcher = watcher;
        let dir = result?;
        self.watched_path = Some(dir.clone());
        Ok(dir)
    }

    /// Stop the watcher, joining its thread off the async executor.
    ///
    /// Returns whether a watch was running.
    pub(super) async fn stop_watch(&mut self) -> Result<bool, CommandError> {
        if !self.watcher.is_running() {
            self.watched_path = None;
            return Ok(false);
        }
        let mut watcher = std::mem::take(&mut self.watcher);
        let watcher = tokio::task::spawn_blocking(move || {
            watcher.stop();
            watcher
        })
        .await?;
        self.watcher = watcher;
        self.watched_path = None;
        self.ctx.watcher_transition(true, false);
        Ok(true)
    }

    /// Send `changes` to this client, then publish them to the rest of the
    /// default group.
    pub(super) async fn emit_changes(&self, changes: Vec<ChangeEvent>) {
        if changes.is_empty() {
            return;
        }
        for change in &changes {
            let _ = self
                .connection
                .send_message(&ServerMessage::FileChange(change.clone()));
        }
        let message = ServerMessage::FileChanges {
            changes,
            origin: self.connection.id.clone(),
        };
        let _ = self
            .ctx
            .group
            .publish(DEFAULT_GROUP, &message, Some(&self.connection.id))
            .await;
    }

    pub(super) fn send(&self, message: &ServerMessage) {
        if !self.connection.send_message(message) {
            info!(conn_id = %self.connection.id, "failed to enqueue reply (queue full or closed)");
        }
    }

    pub(super) fn send_error(&self, error: &CommandError, action: Option<&str>) {
        let code: ErrorCode = error.code();
        counter!(crate::metrics::COMMAND_ERRORS_TOTAL, "code" => code.as_str()).increment(1);
        self.send(&ServerMessage::error(error.to_string(), code, action));
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            if let Some((cancel, handle)) = self.heartbeat.take() {
                cancel.cancel();
                handle.abort();
            }
            if self.watcher.is_running() {
                self.ctx.watcher_transition(true, false);
            }
        }
    }
}

/// Forward watcher events to the client's queue.
fn watch_sink(connection: Arc<ClientConnection>) -> impl EventSink {
    move |event: ChangeEvent| {
        counter!(FILE_CHANGES_TOTAL, "kind" => event.kind.as_str()).increment(1);
        if !connection.send_message(&ServerMessage::FileChange(event)) {
            debug!(conn_id = %connection.id, "dropped file change (queue full)");
        }
    }
}

/// Run a WebSocket session for a connected client.
///
/// 1. Opens the [`ConnectionSession`] (group, heartbeat, watcher, ack)
/// 2. Forwards queued frames to the socket from a writer task
/// 3. Reads frames in a reader task that marks the client alive, even while
///    a command is still running
/// 4. Dispatches inbound text frames in order
/// 5. Closes the session when the client leaves, times out, or the server
///    shuts down
#[instrument(skip_all, fields(conn_id = %connection_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    connection_id: ConnectionId,
    ctx: Arc<SessionContext>,
    shutdown: CancellationToken,
    permit: OwnedSemaphorePermit,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Outbound>(ctx.config.outbound_buffer);
    let connection = Arc::new(ClientConnection::new(connection_id, send_tx));

    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = send_rx.recv().await {
            let message = match frame {
                Outbound::Text(text) => Message::Text(text.as_str().into()),
                Outbound::Ping => Message::Ping(Bytes::new()),
            };
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut session = ConnectionSession::new(ctx, Arc::clone(&connection), shutdown.child_token());
    session.open().await;
    let closing = session.closing_token();

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<Message>(INBOUND_BUFFER);
    let reader_conn = Arc::clone(&connection);
    let reader_closing = closing.clone();
    let reader = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                frame = ws_rx.next() => frame,
                () = reader_closing.cancelled() => break,
            };
            let Some(Ok(message)) = frame else { break };
            reader_conn.mark_alive();

            match message {
                Message::Text(_) | Message::Binary(_) => {
                    if inbound_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => {
                    info!("client sent close frame");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    }
    .in_current_span());

    loop {
        let message = tokio::select! {
            message = inbound_rx.recv() => message,
            () = closing.cancelled() => {
                info!("session cancelled");
                break;
            }
        };
        let Some(message) = message else { break };

        match message {
            Message::Text(text) => session.handle_text(text.as_str()).await,
            Message::Binary(data) => {
                debug!(len = data.len(), "rejecting binary frame");
                session.send_error(
                    &CommandError::Protocol(filedeck_core::ProtocolError::InvalidMessage(
                        "binary frames are not supported".into(),
                    )),
                    None,
                );
            }
            Message::Close(_) | Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    reader.abort();
    session.close().await;
    drop(session);
    drop(connection);

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    info!("client disconnected");
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    drop(permit);
}
