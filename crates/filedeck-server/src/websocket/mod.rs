//! WebSocket sessions: connection queues, broadcast groups, heartbeat, and
//! command dispatch.

pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod session;
