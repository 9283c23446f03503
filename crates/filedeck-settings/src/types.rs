//! Settings types.
//!
//! All structs deserialize from camelCase JSON and default every missing
//! field, so a partial `settings.json` is always valid.

use filedeck_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

/// Smallest allowed `files.listLimit`.
pub const MIN_LIST_LIMIT: usize = 20;
/// Largest allowed `files.listLimit`.
pub const MAX_LIST_LIMIT: usize = 50;

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FiledeckSettings {
    /// Network and connection settings.
    pub server: ServerSettings,
    /// Filesystem root and listing settings.
    pub files: FilesSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Server network and runtime settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` to auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Interval between `heartbeat` frames in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Disconnect a client silent for this long (milliseconds).
    pub heartbeat_timeout_ms: u64,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Capacity of each connection's outbound frame queue.
    pub outbound_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            max_connections: 100,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_message_size: 1024 * 1024,
            outbound_buffer: 1024,
        }
    }
}

/// Filesystem settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilesSettings {
    /// Root directory every path is confined to.
    pub root: String,
    /// Directory each new connection starts watching (defaults to `root`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch_path: Option<String>,
    /// Maximum entries returned by one `list_files` reply.
    pub list_limit: usize,
    /// Name reported by `get_project_info`.
    pub project_name: String,
}

impl Default for FilesSettings {
    fn default() -> Self {
        Self {
            root: ".".to_string(),
            watch_path: None,
            list_limit: MAX_LIST_LIMIT,
            project_name: "filedeck".to_string(),
        }
    }
}

impl FilesSettings {
    /// `list_limit` clamped to the supported range.
    pub fn effective_list_limit(&self) -> usize {
        self.list_limit.clamp(MIN_LIST_LIMIT, MAX_LIST_LIMIT)
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `tracing` filter directive.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
