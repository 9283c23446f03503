//! Error taxonomy.
//!
//! - [`FsError`]: path confinement and filesystem operation failures
//! - [`WatchError`]: watcher lifecycle failures
//! - [`ProtocolError`]: inbound frames that cannot be decoded into a command
//!
//! Every error maps to an [`ErrorCode`], the machine-readable code carried in
//! outbound `error` frames. None of these terminate a connection.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Error codes
// ─────────────────────────────────────────────────────────────────────────────

/// Wire error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Requested path escapes the configured root.
    AccessDenied,
    /// Path does not exist.
    NotFound,
    /// Path exists but is not a directory.
    NotADirectory,
    /// Destination already exists.
    AlreadyExists,
    /// OS-level permission error.
    PermissionDenied,
    /// The OS watch mechanism could not be started.
    WatchUnavailable,
    /// A watcher is already running.
    AlreadyRunning,
    /// Malformed JSON or missing required fields.
    InvalidMessage,
    /// The `action` tag is not a known command.
    UnknownAction,
    /// Any other I/O failure.
    FilesystemError,
    /// Server-side failure unrelated to the request.
    InternalError,
}

impl ErrorCode {
    /// The `SCREAMING_SNAKE_CASE` wire form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AccessDenied => "ACCESS_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::NotADirectory => "NOT_A_DIRECTORY",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::WatchUnavailable => "WATCH_UNAVAILABLE",
            Self::AlreadyRunning => "ALREADY_RUNNING",
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::UnknownAction => "UNKNOWN_ACTION",
            Self::FilesystemError => "FILESYSTEM_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Filesystem errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failures from path resolution and file operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// The path resolves outside the root.
    #[error("Access denied: path {path} is outside allowed directory")]
    AccessDenied {
        /// Path as requested by the client.
        path: String,
    },
    /// Nothing exists at the path.
    #[error("Not found: {path}")]
    NotFound {
        /// Resolved path.
        path: PathBuf,
    },
    /// The path is a file where a directory was required.
    #[error("Not a directory: {path}")]
    NotADirectory {
        /// Resolved path.
        path: PathBuf,
    },
    /// The destination is already present.
    #[error("Already exists: {path}")]
    AlreadyExists {
        /// Resolved path.
        path: PathBuf,
    },
    /// The OS refused access.
    #[error("Permission denied: {path}")]
    PermissionDenied {
        /// Resolved path.
        path: PathBuf,
    },
    /// Any other I/O error.
    #[error("Filesystem error at {path}: {source}")]
    Io {
        /// Path the operation was acting on.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl FsError {
    /// Classify an [`io::Error`] raised while acting on `path`.
    pub fn from_io(path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound { path },
            io::ErrorKind::AlreadyExists => Self::AlreadyExists { path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            io::ErrorKind::NotADirectory => Self::NotADirectory { path },
            _ => Self::Io { path, source },
        }
    }

    /// Machine-readable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AccessDenied { .. } => ErrorCode::AccessDenied,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::NotADirectory { .. } => ErrorCode::NotADirectory,
            Self::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            Self::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            Self::Io { .. } => ErrorCode::FilesystemError,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Watch errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failures from the watcher lifecycle.
#[derive(Debug, Error)]
pub enum WatchError {
    /// `start` was called while a watch is running.
    #[error("A watcher is already running on {path}")]
    AlreadyRunning {
        /// Path currently being watched.
        path: PathBuf,
    },
    /// The OS watch could not be established.
    #[error("Cannot watch {path}: {message}")]
    WatchUnavailable {
        /// Path that was requested.
        path: PathBuf,
        /// Backend error description.
        message: String,
    },
}

impl WatchError {
    /// Machine-readable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AlreadyRunning { .. } => ErrorCode::AlreadyRunning,
            Self::WatchUnavailable { .. } => ErrorCode::WatchUnavailable,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Protocol errors
// ─────────────────────────────────────────────────────────────────────────────

/// Inbound frames that could not be turned into a command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame is not valid JSON.
    #[error("Invalid JSON format")]
    InvalidJson,
    /// JSON is valid but a field is missing or has the wrong shape.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    /// The `action` tag is not recognized.
    #[error("Unknown action: {0}")]
    UnknownAction(String),
}

impl ProtocolError {
    /// Machine-readable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidJson | Self::InvalidMessage(_) => ErrorCode::InvalidMessage,
            Self::UnknownAction(_) => ErrorCode::UnknownAction,
        }
    }
}
