//! # filedeck-server
//!
//! Axum HTTP + `WebSocket` server for the file manager.
//!
//! - `WebSocket` gateway (`/ws`, `/ws/filemanager/`): one [`websocket::session::ConnectionSession`]
//!   per client with its own watcher and heartbeat
//! - Named broadcast groups fan file changes out to other sessions
//! - `/health` and `/metrics` endpoints
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use context::SessionContext;
pub use server::FiledeckServer;
