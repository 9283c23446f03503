//! # filedeck
//!
//! Server binary: loads settings, confines file access to the configured
//! root, and serves the WebSocket file manager until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use filedeck_core::logging::{self, LogFormat};
use filedeck_fs::{FileOperationService, PathGuard};
use filedeck_server::{FiledeckServer, ServerConfig};
use filedeck_settings::FiledeckSettings;

/// Time allowed for open sessions to run their cleanup on shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Real-time file manager server.
#[derive(Parser, Debug)]
#[command(name = "filedeck", about = "Real-time file manager over WebSocket")]
struct Cli {
    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Directory every path is confined to.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Directory each new connection starts watching (relative to the root).
    #[arg(long)]
    watch_path: Option<String>,

    /// Maximum concurrent WebSocket connections.
    #[arg(long)]
    max_connections: Option<usize>,

    /// Settings file (defaults to `~/.filedeck/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `filedeck_server=trace`.
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format: `compact` or `json`.
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,
}

fn parse_log_format(value: &str) -> std::result::Result<LogFormat, String> {
    LogFormat::parse(value).ok_or_else(|| format!("unknown log format: {value}"))
}

impl Cli {
    /// Layer command-line flags over loaded settings.
    fn apply(&self, settings: &mut FiledeckSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(max) = self.max_connections {
            settings.server.max_connections = max;
        }
        if let Some(root) = &self.root {
            settings.files.root = root.display().to_string();
        }
        if let Some(watch) = &self.watch_path {
            settings.files.watch_path = Some(watch.clone());
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

fn load(cli: &Cli) -> Result<FiledeckSettings> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(filedeck_settings::settings_path);
    let mut settings = filedeck_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;
    logging::init_subscriber(&settings.logging.level, settings.logging.format);

    let metrics = filedeck_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let guard = PathGuard::new(&settings.files.root)
        .with_context(|| format!("Invalid root directory: {}", settings.files.root))?;
    let files = FileOperationService::new(guard);
    let config = ServerConfig::from_settings(&settings);

    let server = FiledeckServer::new(config, files).with_metrics(metrics);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        %addr,
        root = %server.context().files.guard().root().display(),
        "filedeck ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let drained = server
        .shutdown()
        .graceful_shutdown(handle, Some(SHUTDOWN_TIMEOUT))
        .await;
    if !drained {
        tracing::warn!("exiting with sessions still open");
    }
    Ok(())
}
