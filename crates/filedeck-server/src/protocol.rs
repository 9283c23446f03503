//! Wire protocol: inbound [`Command`]s and outbound [`ServerMessage`]s.
//!
//! Every inbound frame is a JSON object with an `action` tag; every outbound
//! frame carries a `type` tag.

use chrono::{DateTime, Utc};
use filedeck_core::{ChangeEvent, ConnectionId, ErrorCode, FileEntry, ProtocolError};
use filedeck_fs::ProjectStats;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every `action` tag [`Command::decode`] accepts.
pub const ACTIONS: &[&str] = &[
    "ping",
    "list_files",
    "get_project_info",
    "start_watch",
    "stop_watch",
    "watch_directory",
    "move",
    "copy",
    "delete",
    "create_directory",
    "bulk_upload",
];

fn default_true() -> bool {
    true
}

/// One file announced by `bulk_upload`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct UploadItem {
    /// File name, joined onto the target directory.
    pub name: String,
    /// Declared size in bytes.
    #[serde(default)]
    pub size: u64,
}

/// Inbound client command.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    /// Liveness probe.
    Ping,
    /// List a directory (defaults to the root).
    ListFiles {
        /// Directory to list.
        #[serde(default)]
        path: Option<String>,
    },
    /// Project descriptor and tree statistics.
    GetProjectInfo,
    /// (Re)start the session watcher.
    StartWatch {
        /// Directory to watch (defaults to the current watch path).
        #[serde(default)]
        path: Option<String>,
    },
    /// Stop the session watcher.
    StopWatch,
    /// Start or stop watching a directory.
    WatchDirectory {
        /// Directory to watch.
        #[serde(default)]
        path: Option<String>,
        /// `false` stops watching.
        #[serde(default = "default_true")]
        watch: bool,
    },
    /// Move or rename.
    Move {
        /// Existing entry.
        source_path: String,
        /// New location; must not exist.
        target_path: String,
    },
    /// Copy, recursively for directories.
    Copy {
        /// Existing entry.
        source_path: String,
        /// New location; must not exist.
        target_path: String,
    },
    /// Delete, recursively for directories.
    Delete {
        /// Entry to remove.
        source_path: String,
    },
    /// Create a directory with parents.
    CreateDirectory {
        /// Directory to create.
        source_path: String,
    },
    /// Announce uploaded files; no bytes are transferred.
    BulkUpload {
        /// Files announced.
        #[serde(default)]
        files: Vec<UploadItem>,
        /// Directory the files landed in (defaults to the root).
        #[serde(default)]
        target_path: Option<String>,
    },
}

impl Command {
    /// Decode a text frame.
    ///
    /// Unknown tags are rejected before field validation so they report
    /// [`ProtocolError::UnknownAction`] rather than a shape error.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(|_| ProtocolError::InvalidJson)?;
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::InvalidMessage("missing `action` field".into()))?;
        if !ACTIONS.contains(&action) {
            return Err(ProtocolError::UnknownAction(action.to_string()));
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidMessage(e.to_string()))
    }

    /// The `action` tag, also used as a metrics label.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::ListFiles { .. } => "list_files",
            Self::GetProjectInfo => "get_project_info",
            Self::StartWatch { .. } => "start_watch",
            Self::StopWatch => "stop_watch",
            Self::WatchDirectory { .. } => "watch_directory",
            Self::Move { .. } => "move",
            Self::Copy { .. } => "copy",
            Self::Delete { .. } => "delete",
            Self::CreateDirectory { .. } => "create_directory",
            Self::BulkUpload { .. } => "bulk_upload",
        }
    }
}

/// Static project descriptor plus live tree statistics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectInfo {
    /// Configured project name.
    pub project_name: String,
    /// Canonical root directory.
    pub root: String,
    /// Server implementation.
    pub backend: String,
    /// Always `"connected"` when sent over a live socket.
    pub websocket_status: String,
    /// Directory this session watches, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watching: Option<String>,
    /// Supported capabilities.
    pub features: Vec<String>,
    /// Tree statistics.
    #[serde(flatten)]
    pub stats: ProjectStats,
}

/// Per-file entry of a `bulk_upload_result`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    /// File name.
    pub name: String,
    /// Declared size.
    pub size: u64,
    /// Always `"uploaded"`.
    pub status: String,
    /// Resolved destination path.
    pub path: String,
}

/// Outbound server frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once when the session opens.
    ConnectionStatus {
        /// Always `"connected"`.
        status: String,
        /// Greeting.
        message: String,
        /// This connection's ID.
        connection_id: ConnectionId,
        /// Initially watched directory, if the watcher started.
        #[serde(skip_serializing_if = "Option::is_none")]
        watching: Option<String>,
    },
    /// Reply to `ping`.
    Pong {
        /// Server time.
        timestamp: DateTime<Utc>,
        /// Fixed text.
        message: String,
    },
    /// Periodic liveness frame.
    Heartbeat {
        /// Server time.
        timestamp: DateTime<Utc>,
        /// Fixed text.
        message: String,
    },
    /// Reply to `list_files`.
    FilesList {
        /// Listed directory.
        path: String,
        /// Entries, capped at the list limit.
        files: Vec<FileEntry>,
        /// `files.len()`.
        count: usize,
        /// Entries in the directory before capping.
        total: usize,
    },
    /// Reply to `get_project_info`.
    ProjectInfo {
        /// Descriptor and statistics.
        info: ProjectInfo,
    },
    /// Successful file operation.
    FileOperationResult {
        /// The `action` that ran.
        operation: String,
        /// Always `true`; failures are sent as [`ServerMessage::Error`].
        success: bool,
        /// Snapshot of the affected entry (absent for `delete`).
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<FileEntry>,
        /// Human-readable summary.
        message: String,
    },
    /// Reply to `bulk_upload`.
    BulkUploadResult {
        /// Always `true`.
        success: bool,
        /// One entry per announced file.
        results: Vec<UploadResult>,
        /// Human-readable summary.
        message: String,
    },
    /// Reply to `watch_directory`.
    DirectoryWatchStatus {
        /// Whether a watch is now running.
        watching: bool,
        /// Watched directory when `watching`.
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        /// Human-readable summary.
        message: String,
    },
    /// Any failed command.
    Error {
        /// Human-readable description.
        message: String,
        /// Machine-readable code.
        code: ErrorCode,
        /// The action that failed, when it was decoded.
        #[serde(skip_serializing_if = "Option::is_none")]
        action: Option<String>,
    },
    /// Generic acknowledgment.
    Success {
        /// Human-readable summary.
        message: String,
    },
    /// One change, observed by this session's watcher or caused by its command.
    FileChange(ChangeEvent),
    /// Changes caused by another member of the broadcast group.
    FileChanges {
        /// Changes in the order they happened.
        changes: Vec<ChangeEvent>,
        /// Connection whose command caused them.
        origin: ConnectionId,
    },
}

impl ServerMessage {
    /// Build an `error` frame.
    pub fn error(message: impl Into<String>, code: ErrorCode, action: Option<&str>) -> Self {
        Self::Error {
            message: message.into(),
            code,
            action: action.map(str::to_string),
        }
    }

    /// Build a `success` frame.
    pub fn success(message: impl Into<String>) -> Self {
        Self::Success {
            message: message.into(),
        }
    }

    /// Build a `heartbeat` frame stamped now.
    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: Utc::now(),
            message: "Connection is alive!".into(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
