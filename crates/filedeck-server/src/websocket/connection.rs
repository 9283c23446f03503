//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use filedeck_core::ConnectionId;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::warn;

use crate::protocol::ServerMessage;

/// A frame queued for the socket writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// JSON text frame, shared between broadcast recipients.
    Text(Arc<String>),
    /// WebSocket Ping control frame.
    Ping,
}

/// Handle to a connected client's outbound queue.
///
/// Sends never block: a full or closed queue drops the frame and counts it.
/// Safe to use from the watcher thread.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    /// When this connection was established.
    pub connected_at: Instant,
    last_seen: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a pre-serialized text frame.
    ///
    /// Returns `false` if the queue is full or closed.
    pub fn send(&self, message: Arc<String>) -> bool {
        self.enqueue(Outbound::Text(message))
    }

    /// Serialize and queue a protocol message.
    pub fn send_message(&self, message: &ServerMessage) -> bool {
        match message.to_json() {
            Ok(json) => self.send(Arc::new(json)),
            Err(e) => {
                warn!(conn_id = %self.id, error = %e, "failed to serialize message");
                false
            }
        }
    }

    /// Queue a Ping control frame.
    pub fn send_ping(&self) -> bool {
        self.enqueue(Outbound::Ping)
    }

    fn enqueue(&self, frame: Outbound) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity (any frame, including Pong).
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound frame (or connection establishment).
    pub fn idle(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("dropped_messages", &self.drop_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(capacity: usize) -> (ClientConnection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ClientConnection::new(ConnectionId::from("conn_1"), tx), rx)
    }

    #[tokio::test]
    async fn send_text() {
        let (conn, mut rx) = make_connection(8);
        assert!(conn.send(Arc::new("hello".into())));
        assert_eq!(rx.recv().await.unwrap(), Outbound::Text(Arc::new("hello".into())));
    }

    #[tokio::test]
    async fn send_message_serializes() {
        let (conn, mut rx) = make_connection(8);
        assert!(conn.send_message(&ServerMessage::success("ok")));
        let Outbound::Text(text) = rx.recv().await.unwrap() else {
            panic!("expected text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "success");
        assert_eq!(value["message"], "ok");
    }

    #[tokio::test]
    async fn send_ping() {
        let (conn, mut rx) = make_connection(8);
        assert!(conn.send_ping());
        assert_eq!(rx.recv().await.unwrap(), Outbound::Ping);
    }

    #[test]
    fn full_queue_counts_drops() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.send(Arc::new("one".into())));
        assert!(!conn.send(Arc::new("two".into())));
        assert!(!conn.send_ping());
        assert_eq!(conn.drop_count(), 2);
    }

    #[test]
    fn closed_queue_counts_drops() {
        let (conn, rx) = make_connection(8);
        drop(rx);
        assert!(!conn.send(Arc::new("x".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_from_foreign_thread() {
        let (conn, mut rx) = make_connection(8);
        let conn = Arc::new(conn);
        let remote = Arc::clone(&conn);
        std::thread::spawn(move || assert!(remote.send(Arc::new("from thread".into()))))
            .join()
            .unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn mark_alive_resets_idle() {
        let (conn, _rx) = make_connection(8);
        std::thread::sleep(Duration::from_millis(20));
        assert!(conn.idle() >= Duration::from_millis(20));
        conn.mark_alive();
        assert!(conn.idle() < Duration::from_millis(20));
        assert!(conn.age() >= Duration::from_millis(20));
    }
}
