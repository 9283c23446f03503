//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle that renders `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upgrades refused at the connection cap (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// Broadcast frames dropped on full queues (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Commands handled (counter, labels: action).
pub const COMMANDS_TOTAL: &str = "commands_total";
/// Failed commands (counter, labels: code).
pub const COMMAND_ERRORS_TOTAL: &str = "command_errors_total";
/// Change events delivered from watchers (counter, labels: kind).
pub const FILE_CHANGES_TOTAL: &str = "file_changes_total";
/// Running watchers (gauge).
pub const WATCHERS_ACTIVE: &str = "watchers_active";
