//! Server configuration.

use std::time::Duration;

use filedeck_settings::FiledeckSettings;
use serde::{Deserialize, Serialize};

/// Runtime configuration for [`FiledeckServer`](crate::server::FiledeckServer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Interval between `heartbeat` frames.
    pub heartbeat_interval: Duration,
    /// Disconnect clients idle for longer than this.
    pub heartbeat_timeout: Duration,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound frame queue capacity per connection.
    pub outbound_buffer: usize,
    /// Cap on `files_list` entries.
    pub list_limit: usize,
    /// Name reported by `get_project_info`.
    pub project_name: String,
    /// Directory each session starts watching, relative to the root.
    pub watch_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 100,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            max_message_size: 1024 * 1024,
            outbound_buffer: 1024,
            list_limit: 50,
            project_name: "filedeck".into(),
            watch_path: String::new(),
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &FiledeckSettings) -> Self {
        let server = &settings.server;
        let files = &settings.files;
        Self {
            host: server.host.clone(),
            port: server.port,
            max_connections: server.max_connections.max(1),
            heartbeat_interval: Duration::from_millis(server.heartbeat_interval_ms.max(1)),
            heartbeat_timeout: Duration::from_millis(server.heartbeat_timeout_ms),
            max_message_size: server.max_message_size,
            outbound_buffer: server.outbound_buffer.max(1),
            list_limit: files.effective_list_limit(),
            project_name: files.project_name.clone(),
            watch_path: files.watch_path.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(cfg.list_limit, 50);
        assert!(cfg.watch_path.is_empty());
    }

    #[test]
    fn from_settings_maps_fields() {
        let mut settings = FiledeckSettings::default();
        settings.server.port = 9000;
        settings.server.heartbeat_interval_ms = 1500;
        settings.files.list_limit = 5;
        settings.files.watch_path = Some("inbox".into());

        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.heartbeat_interval, Duration::from_millis(1500));
        assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(90));
        assert_eq!(cfg.list_limit, 20);
        assert_eq!(cfg.watch_path, "inbox");
    }

    #[test]
    fn unset_watch_path_watches_the_root() {
        let mut settings = FiledeckSettings::default();
        settings.files.root = "data".into();
        let cfg = ServerConfig::from_settings(&settings);
        assert!(cfg.watch_path.is_empty());
    }

    #[test]
    fn zero_capacities_are_raised() {
        let mut settings = FiledeckSettings::default();
        settings.server.max_connections = 0;
        settings.server.outbound_buffer = 0;
        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.max_connections, 1);
        assert_eq!(cfg.outbound_buffer, 1);
    }
}
