//! Heartbeat frames and liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::connection::ClientConnection;
use crate::protocol::ServerMessage;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client sent nothing for longer than the timeout.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Send a `heartbeat` frame and a Ping every `interval` until cancelled.
///
/// The first frame goes out one interval after start. On each tick the
/// connection's idle time is checked against `timeout`; any inbound frame
/// (including the Pong answering our Ping) resets it.
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if connection.idle() > timeout {
                    debug!(conn_id = %connection.id, idle = ?connection.idle(), "heartbeat timed out");
                    return HeartbeatResult::TimedOut;
                }
                let _ = connection.send_message(&ServerMessage::heartbeat());
                let _ = connection.send_ping();
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}
