//! `FiledeckServer`: Axum HTTP + WebSocket server.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use filedeck_core::ConnectionId;
use filedeck_fs::FileOperationService;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::context::SessionContext;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_CONNECTIONS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Dependencies handed to every session.
    pub ctx: Arc<SessionContext>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// One permit per open connection.
    pub permits: Arc<Semaphore>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The file manager server.
pub struct FiledeckServer {
    ctx: Arc<SessionContext>,
    shutdown: Arc<ShutdownCoordinator>,
    permits: Arc<Semaphore>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl FiledeckServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, files: FileOperationService) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_connections));
        Self {
            ctx: Arc::new(SessionContext::new(config, files)),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            permits,
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: Arc::clone(&self.ctx),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            permits: Arc::clone(&self.permits),
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/ws/filemanager/", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// The returned task finishes once the listener has stopped and every
    /// session has run its cleanup.
    pub async fn listen(&self) -> io::Result<(SocketAddr, JoinHandle<()>)> {
        let config = &self.ctx.config;
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;
        info!(%addr, root = %self.ctx.files.guard().root().display(), "filedeck server listening");

        let router = self.router();
        let shutdown = Arc::clone(&self.shutdown);
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.token().cancelled_owned())
                .await
            {
                warn!(error = %e, "server error");
            }
            shutdown.drain().await;
            info!("server stopped");
        });
        Ok((addr, handle))
    }

    /// Session dependencies.
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }

    /// Open WebSocket connections.
    pub fn connection_count(&self) -> usize {
        open_connections(&self.ctx, &self.permits)
    }
}

fn open_connections(ctx: &SessionContext, permits: &Semaphore) -> usize {
    ctx.config
        .max_connections
        .saturating_sub(permits.available_permits())
}

/// GET /ws, /ws/filemanager/
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }
    let Ok(permit) = Arc::clone(&state.permits).try_acquire_owned() else {
        warn!(
            max = state.ctx.config.max_connections,
            "connection limit reached, rejecting upgrade"
        );
        counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };

    let ctx = Arc::clone(&state.ctx);
    let coordinator = Arc::clone(&state.shutdown);
    let shutdown = coordinator.token();
    ws.max_message_size(ctx.config.max_message_size)
        .on_upgrade(move |socket| {
            coordinator.track(run_ws_session(
                socket,
                ConnectionId::new(),
                ctx,
                shutdown,
                permit,
            ))
        })
        .into_response()
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = open_connections(&state.ctx, &state.permits);
    Json(health::health_check(
        state.start_time,
        connections,
        state.ctx.active_watchers(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
