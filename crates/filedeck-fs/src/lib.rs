//! # filedeck-fs
//!
//! Filesystem side of filedeck:
//!
//! - [`guard::PathGuard`]: confines every requested path to a fixed root
//! - [`ops::FileOperationService`]: list, create, delete, move, copy (blocking)
//! - [`watcher::FileSystemWatcher`]: non-recursive OS change notifications on a
//!   dedicated thread, normalized into [`filedeck_core::ChangeEvent`]s

#![deny(unsafe_code)]

pub mod guard;
pub mod mime;
pub mod ops;
pub mod watcher;

pub use guard::PathGuard;
pub use ops::{FileOperationService, ProjectStats, Transfer};
pub use watcher::{EventSink, FileSystemWatcher, WatcherState};
