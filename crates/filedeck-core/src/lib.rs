//! # filedeck-core
//!
//! Foundation types, errors, branded IDs, and logging setup for filedeck.
//!
//! This crate provides the shared vocabulary that all other filedeck crates depend on:
//!
//! - **Branded IDs**: `ConnectionId` as a newtype for type safety
//! - **Entries**: `FileEntry` metadata snapshots produced by directory listings
//! - **Change events**: `ChangeEvent` records emitted by watchers and file operations
//! - **Errors**: `FsError`, `WatchError`, `ProtocolError` via `thiserror`, wire error codes
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod types;

pub use errors::{ErrorCode, FsError, ProtocolError, WatchError};
pub use ids::ConnectionId;
pub use types::{ChangeEvent, ChangeKind, EntryKind, FileEntry};
