//! Command dispatch for a [`ConnectionSession`].
//!
//! Every failure is turned into a single `error` frame; nothing here closes
//! the connection.

use std::path::{Component, Path};
use std::sync::Arc;

use chrono::Utc;
use filedeck_core::{ChangeEvent, ErrorCode, FsError, ProtocolError, WatchError};
use filedeck_fs::FileOperationService;
use metrics::counter;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{Span, debug, instrument};

use super::session::ConnectionSession;
use crate::metrics::COMMANDS_TOTAL;
use crate::protocol::{Command, ProjectInfo, ServerMessage, UploadItem, UploadResult};

const FEATURES: &[&str] = &[
    "file_watching",
    "file_operations",
    "bulk_upload",
    "project_stats",
    "broadcast",
];

/// Why a command failed.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Path resolution or filesystem failure.
    #[error(transparent)]
    Fs(#[from] FsError),
    /// Watcher lifecycle failure.
    #[error(transparent)]
    Watch(#[from] WatchError),
    /// Undecodable frame.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// `stop_watch` without a running watcher.
    #[error("No active file watcher")]
    NoWatcher,
    /// A blocking task panicked or was cancelled.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<JoinError> for CommandError {
    fn from(err: JoinError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl CommandError {
    /// Machine-readable code for the `error` frame.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Fs(e) => e.code(),
            Self::Watch(e) => e.code(),
            Self::Protocol(e) => e.code(),
            Self::NoWatcher => ErrorCode::WatchUnavailable,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}

/// Run `op` on the blocking pool so the session keeps servicing its
/// heartbeat.
async fn blocking<T, F>(files: &Arc<FileOperationService>, op: F) -> Result<T, CommandError>
where
    T: Send + 'static,
    F: FnOnce(&FileOperationService) -> Result<T, FsError> + Send + 'static,
{
    let files = Arc::clone(files);
    Ok(tokio::task::spawn_blocking(move || op(&files)).await??)
}

impl ConnectionSession {
    /// Decode and run one text frame.
    #[instrument(skip_all, fields(conn_id = %self.connection.id, action = tracing::field::Empty))]
    pub async fn handle_text(&mut self, text: &str) {
        let command = match Command::decode(text) {
            Ok(command) => command,
            Err(e) => {
                debug!(error = %e, "rejected frame");
                self.send_error(&CommandError::from(e), None);
                return;
            }
        };
        let action = command.action();
        let _ = Span::current().record("action", action);
        counter!(COMMANDS_TOTAL, "action" => action).increment(1);

        if let Err(e) = self.dispatch(command).await {
            debug!(error = %e, code = %e.code(), "command failed");
            self.send_error(&e, Some(action));
        }
    }

    async fn dispatch(&mut self, command: Command) -> Result<(), CommandError> {
        match command {
            Command::Ping => {
                self.send(&ServerMessage::Pong {
                    timestamp: Utc::now(),
                    message: "Pong from filedeck server".into(),
                });
            }
            Command::ListFiles { path } => self.list_files(path.unwrap_or_default()).await?,
            Command::GetProjectInfo => self.project_info().await?,
            Command::StartWatch { path } => {
                let requested = path.unwrap_or_else(|| self.current_watch_request());
                let dir = self.watch(&requested).await?;
                self.send(&ServerMessage::success(format!(
                    "Started watching: {}",
                    dir.display()
                )));
            }
            Command::StopWatch => {
                if !self.stop_watch().await? {
                    return Err(CommandError::NoWatcher);
                }
                self.send(&ServerMessage::success("File watching stopped"));
            }
            Command::WatchDirectory { path, watch } => {
                let reply = if watch {
                    let dir = self.watch(&path.unwrap_or_default()).await?;
                    ServerMessage::DirectoryWatchStatus {
                        watching: true,
                        message: format!("Now watching directory: {}", dir.display()),
                        path: Some(dir.display().to_string()),
                    }
                } else {
                    let _ = self.stop_watch().await?;
                    ServerMessage::DirectoryWatchStatus {
                        watching: false,
                        path: None,
                        message: "File watching stopped".into(),
                    }
                };
                self.send(&reply);
            }
            Command::Move {
                source_path,
                target_path,
            } => {
                let moved =
                    blocking(&self.ctx.files, move |f| f.move_entry(&source_path, &target_path))
                        .await?;
                let change = ChangeEvent::moved(
                    moved.source.display().to_string(),
                    moved.entry.path.clone(),
                    moved.entry.is_directory(),
                );
                let message = format!("Moved {} to {}", moved.source.display(), moved.entry.path);
                self.operation_done("move", Some(moved.entry), message, change)
                    .await;
            }
            Command::Copy {
                source_path,
                target_path,
            } => {
                let copied =
                    blocking(&self.ctx.files, move |f| f.copy_entry(&source_path, &target_path))
                        .await?;
                let change =
                    ChangeEvent::created(copied.entry.path.clone(), copied.entry.is_directory());
                let message = format!("Copied {} to {}", copied.source.display(), copied.entry.path);
                self.operation_done("copy", Some(copied.entry), message, change)
                    .await;
            }
            Command::Delete { source_path } => {
                let removed = blocking(&self.ctx.files, move |f| f.delete(&source_path)).await?;
                let change = ChangeEvent::deleted(removed.path.clone(), removed.is_directory());
                let message = format!("Deleted {}", removed.path);
                self.operation_done("delete", None, message, change).await;
            }
            Command::CreateDirectory { source_path } => {
                let created =
                    blocking(&self.ctx.files, move |f| f.create_directory(&source_path)).await?;
                let change = ChangeEvent::created(created.path.clone(), true);
                let message = format!("Created directory {}", created.path);
                self.operation_done("create_directory", Some(created), message, change)
                    .await;
            }
            Command::BulkUpload { files, target_path } => {
                self.bulk_upload(files, target_path.unwrap_or_default())
                    .await?;
            }
        }
        Ok(())
    }

    /// The path string that re-resolves to the current watch target.
    fn current_watch_request(&self) -> String {
        match &self.watched_path {
            Some(path) => path.display().to_string(),
            None => self.ctx.config.watch_path.clone(),
        }
    }

    async fn list_files(&self, path: String) -> Result<(), CommandError> {
        let limit = self.ctx.config.list_limit;
        let (dir, mut files) = blocking(&self.ctx.files, move |f| {
            let dir = f.guard().resolve(&path)?;
            let files = f.list(&path)?;
            Ok((dir, files))
        })
        .await?;
        let total = files.len();
        files.truncate(limit);
        self.send(&ServerMessage::FilesList {
            path: dir.display().to_string(),
            count: files.len(),
            total,
            files,
        });
        Ok(())
    }

    async fn project_info(&self) -> Result<(), CommandError> {
        let stats = blocking(&self.ctx.files, |f| Ok(f.project_stats())).await?;
        let info = ProjectInfo {
            project_name: self.ctx.config.project_name.clone(),
            root: self.ctx.files.guard().root().display().to_string(),
            backend: format!("filedeck {}", env!("CARGO_PKG_VERSION")),
            websocket_status: "connected".into(),
            watching: self.watched_path.as_ref().map(|p| p.display().to_string()),
            features: FEATURES.iter().map(|f| (*f).to_string()).collect(),
            stats,
        };
        self.send(&ServerMessage::ProjectInfo { info });
        Ok(())
    }

    async fn bulk_upload(&self, items: Vec<UploadItem>, target: String) -> Result<(), CommandError> {
        if let Some(bad) = items.iter().find(|item| !is_plain_name(&item.name)) {
            return Err(ProtocolError::InvalidMessage(format!(
                "upload name must be a single file name: {:?}",
                bad.name
            ))
            .into());
        }

        let resolved = blocking(&self.ctx.files, move |f| {
            let guard = f.guard();
            let dir = guard.resolve(&target)?;
            items
                .into_iter()
                .map(|item| {
                    let path = guard.resolve(&dir.join(&item.name).to_string_lossy())?;
                    Ok((item, path))
                })
                .collect::<Result<Vec<_>, FsError>>()
        })
        .await?;

        let (results, changes): (Vec<_>, Vec<_>) = resolved
            .into_iter()
            .map(|(item, path)| {
                let path = path.display().to_string();
                let change = ChangeEvent::created(path.clone(), false);
                let result = UploadResult {
                    name: item.name,
                    size: item.size,
                    status: "uploaded".into(),
                    path,
                };
                (result, change)
            })
            .unzip();

        self.send(&ServerMessage::BulkUploadResult {
            success: true,
            message: format!("Successfully uploaded {} files", results.len()),
            results,
        });
        self.emit_changes(changes).await;
        Ok(())
    }

    async fn operation_done(
        &self,
        operation: &str,
        result: Option<filedeck_core::FileEntry>,
        message: String,
        change: ChangeEvent,
    ) {
        self.send(&ServerMessage::FileOperationResult {
            operation: operation.into(),
            success: true,
            result,
            message,
        });
        self.emit_changes(vec![change]).await;
    }
}

/// A name with exactly one normal component (no separators, `.` or `..`).
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::context::SessionContext;
    use crate::websocket::broadcast::DEFAULT_GROUP;
    use crate::websocket::connection::{ClientConnection, Outbound};
    use filedeck_core::ConnectionId;
    use filedeck_fs::PathGuard;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        _dir: tempfile::TempDir,
        ctx: Arc<SessionContext>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let files = FileOperationService::new(PathGuard::new(dir.path()).unwrap());
        let config = ServerConfig {
            list_limit: 20,
            ..ServerConfig::default()
        };
        let ctx = Arc::new(SessionContext::new(config, files));
        Fixture { _dir: dir, ctx }
    }

    fn session(fx: &Fixture, id: &str) -> (ConnectionSession, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(512);
        let conn = Arc::new(ClientConnection::new(ConnectionId::from(id), tx));
        (
            ConnectionSession::new(Arc::clone(&fx.ctx), conn, CancellationToken::new()),
            rx,
        )
    }

    /// Drain queued text frames, skipping pings and watcher events.
    fn replies(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Outbound::Text(text) = frame {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }
        out
    }

    fn root(fx: &Fixture) -> std::path::PathBuf {
        fx.ctx.files.guard().root().to_path_buf()
    }

    async fn run(s: &mut ConnectionSession, value: Value) {
        s.handle_text(&value.to_string()).await;
    }

    #[tokio::test]
    async fn ping_replies_pong() {
        let fx = fixture();
        let (mut s, mut rx) = session(&fx, "a");
        run(&mut s, json!({"action": "ping"})).await;
        let out = replies(&mut rx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["type"], "pong");
        assert!(out[0]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames() {
        let fx = fixture();
        let (mut s, mut rx) = session(&fx, "a");
        s.handle_text("{oops").await;
        run(&mut s, json!({"action": "dance"})).await;
        let out = replies(&mut rx);
        assert_eq!(out[0]["type"], "error");
        assert_eq!(out[0]["message"], "Invalid JSON format");
        assert_eq!(out[0]["code"], "INVALID_MESSAGE");
        assert_eq!(out[1]["code"], "UNKNOWN_ACTION");
        assert!(out[1].get("action").is_none());
    }

    #[tokio::test]
    async fn list_files_is_capped() {
        let fx = fixture();
        for i in 0..25 {
            std::fs::write(root(&fx).join(format!("f{i:02}.txt")), "x").unwrap();
        }
        let (mut s, mut rx) = session(&fx, "a");
        run(&mut s, json!({"action": "list_files"})).await;
        let out = replies(&mut rx);
        assert_eq!(out[0]["type"], "files_list");
        assert_eq!(out[0]["count"], 20);
        assert_eq!(out[0]["total"], 25);
        assert_eq!(out[0]["files"].as_array().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn list_files_outside_root_is_denied() {
        let fx = fixture();
        let (mut s, mut rx) = session(&fx, "a");
        run(&mut s, json!({"action": "list_files", "path": "../.."})).await;
        let out = replies(&mut rx);
        assert_eq!(out[0]["type"], "error");
        assert_eq!(out[0]["code"], "ACCESS_DENIED");
        assert_eq!(out[0]["action"], "list_files");
    }

    #[tokio::test]
    async fn create_directory_replies_then_emits_change() {
        let fx = fixture();
        let (mut s, mut rx) = session(&fx, "a");
        let target = root(&fx).join("newdir");
        run(
            &mut s,
            json!({"action": "create_directory", "source_path": target.display().to_string()}),
        )
        .await;
        let out = replies(&mut rx);
        assert_eq!(out[0]["type"], "file_operation_result");
        assert_eq!(out[0]["operation"], "create_directory");
        assert_eq!(out[0]["success"], true);
        assert_eq!(out[1]["type"], "file_change");
        assert_eq!(out[1]["change_type"], "created");
        assert_eq!(out[1]["is_directory"], true);
        assert_eq!(out[1]["path"], target.display().to_string());
        assert!(target.is_dir());
    }

    #[tokio::test]
    async fn failed_operation_sends_one_error_and_no_change() {
        let fx = fixture();
        let (mut s, mut rx) = session(&fx, "a");
        run(
            &mut s,
            json!({"action": "move", "source_path": "missing.txt", "target_path": "b.txt"}),
        )
        .await;
        let out = replies(&mut rx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["type"], "error");
        assert_eq!(out[0]["code"], "NOT_FOUND");
        assert_eq!(out[0]["action"], "move");
    }

    #[tokio::test]
    async fn escaping_move_leaves_tree_untouched() {
        let fx = fixture();
        std::fs::write(root(&fx).join("a.txt"), "x").unwrap();
        let (mut s, mut rx) = session(&fx, "a");
        run(
            &mut s,
            json!({"action": "move", "source_path": "a.txt", "target_path": "../../escaped.txt"}),
        )
        .await;
        let out = replies(&mut rx);
        assert_eq!(out[0]["code"], "ACCESS_DENIED");
        assert!(root(&fx).join("a.txt").exists());
    }

    #[tokio::test]
    async fn operations_publish_to_other_members() {
        let fx = fixture();
        let (mut a, mut rx_a) = session(&fx, "a");
        let (b, mut rx_b) = session(&fx, "b");
        fx.ctx
            .group
            .join(DEFAULT_GROUP, Arc::clone(&a.connection))
            .await;
        fx.ctx
            .group
            .join(DEFAULT_GROUP, Arc::clone(&b.connection))
            .await;

        std::fs::write(root(&fx).join("a.txt"), "x").unwrap();
        run(
            &mut a,
            json!({"action": "copy", "source_path": "a.txt", "target_path": "b.txt"}),
        )
        .await;

        let mine = replies(&mut rx_a);
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[1]["type"], "file_change");

        let theirs = replies(&mut rx_b);
        assert_eq!(theirs.len(), 1);
        assert_eq!(theirs[0]["type"], "file_changes");
        assert_eq!(theirs[0]["origin"], "a");
        assert_eq!(theirs[0]["changes"][0]["change_type"], "created");
        drop(b);
    }

    #[tokio::test]
    async fn move_and_delete_emit_matching_changes() {
        let fx = fixture();
        std::fs::write(root(&fx).join("a.txt"), "x").unwrap();
        let (mut s, mut rx) = session(&fx, "a");

        run(
            &mut s,
            json!({"action": "move", "source_path": "a.txt", "target_path": "b.txt"}),
        )
        .await;
        run(&mut s, json!({"action": "delete", "source_path": "b.txt"})).await;

        let out = replies(&mut rx);
        assert_eq!(out[1]["change_type"], "moved");
        assert_eq!(out[1]["old_path"], root(&fx).join("a.txt").display().to_string());
        assert_eq!(out[2]["type"], "file_operation_result");
        assert!(out[2].get("result").is_none());
        assert_eq!(out[3]["change_type"], "deleted");
        assert!(!root(&fx).join("b.txt").exists());
    }

    #[tokio::test]
    async fn deleting_root_is_denied() {
        let fx = fixture();
        let (mut s, mut rx) = session(&fx, "a");
        run(&mut s, json!({"action": "delete", "source_path": ""})).await;
        assert_eq!(replies(&mut rx)[0]["code"], "ACCESS_DENIED");
        assert!(root(&fx).is_dir());
    }

    #[tokio::test]
    async fn bulk_upload_synthesizes_created_events() {
        let fx = fixture();
        let (mut s, mut rx) = session(&fx, "a");
        run(
            &mut s,
            json!({"action": "bulk_upload", "files": [{"name": "x.txt", "size": 3}, {"name": "y.txt"}]}),
        )
        .await;
        let out = replies(&mut rx);
        assert_eq!(out[0]["type"], "bulk_upload_result");
        assert_eq!(out[0]["message"], "Successfully uploaded 2 files");
        assert_eq!(out[0]["results"][0]["size"], 3);
        assert_eq!(out[1]["change_type"], "created");
        assert_eq!(out[2]["path"], root(&fx).join("y.txt").display().to_string());
    }

    #[tokio::test]
    async fn bulk_upload_rejects_escaping_names() {
        let fx = fixture();
        let (mut s, mut rx) = session(&fx, "a");
        run(
            &mut s,
            json!({"action": "bulk_upload", "files": [{"name": "../../evil"}]}),
        )
        .await;
        let out = replies(&mut rx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["code"], "INVALID_MESSAGE");
    }

    #[tokio::test]
    async fn bulk_upload_requires_plain_file_names() {
        let fx = fixture();
        let (mut s, mut rx) = session(&fx, "a");
        for name in ["", ".", "..", "a/b", "/abs"] {
            run(
                &mut s,
                json!({"action": "bulk_upload", "files": [{"name": "ok.txt"}, {"name": name}]}),
            )
            .await;
            let out = replies(&mut rx);
            assert_eq!(out.len(), 1, "{name:?}");
            assert_eq!(out[0]["type"], "error");
            assert_eq!(out[0]["code"], "INVALID_MESSAGE", "{name:?}");
        }
        assert!(is_plain_name("notes.txt"));
        assert!(is_plain_name("..hidden"));
    }

    #[tokio::test]
    async fn watch_lifecycle_commands() {
        let fx = fixture();
        std::fs::create_dir(root(&fx).join("docs")).unwrap();
        let (mut s, mut rx) = session(&fx, "a");

        run(&mut s, json!({"action": "stop_watch"})).await;
        run(&mut s, json!({"action": "watch_directory", "path": "docs"})).await;
        assert_eq!(s.watched_path(), Some(root(&fx).join("docs").as_path()));
        assert_eq!(fx.ctx.active_watchers(), 1);
        run(&mut s, json!({"action": "start_watch"})).await;
        assert_eq!(fx.ctx.active_watchers(), 1);
        run(&mut s, json!({"action": "watch_directory", "watch": false})).await;
        assert_eq!(s.watched_path(), None);
        assert_eq!(fx.ctx.active_watchers(), 0);

        let out: Vec<_> = replies(&mut rx)
            .into_iter()
            .filter(|v| v["type"] != "file_change")
            .collect();
        assert_eq!(out[0]["code"], "WATCH_UNAVAILABLE");
        assert_eq!(out[0]["message"], "No active file watcher");
        assert_eq!(out[1]["type"], "directory_watch_status");
        assert_eq!(out[1]["watching"], true);
        assert_eq!(out[2]["type"], "success");
        assert!(out[2]["message"].as_str().unwrap().starts_with("Started watching: "));
        assert_eq!(out[3]["watching"], false);
    }

    #[tokio::test]
    async fn watching_a_file_fails() {
        let fx = fixture();
        std::fs::write(root(&fx).join("plain.txt"), "x").unwrap();
        let (mut s, mut rx) = session(&fx, "a");
        run(&mut s, json!({"action": "start_watch", "path": "plain.txt"})).await;
        assert_eq!(replies(&mut rx)[0]["code"], "WATCH_UNAVAILABLE");
        assert_eq!(fx.ctx.active_watchers(), 0);
    }

    #[tokio::test]
    async fn project_info_includes_stats() {
        let fx = fixture();
        std::fs::write(root(&fx).join("a.txt"), "hello").unwrap();
        std::fs::create_dir(root(&fx).join("node_modules")).unwrap();
        let (mut s, mut rx) = session(&fx, "a");
        run(&mut s, json!({"action": "get_project_info"})).await;
        let out = replies(&mut rx);
        assert_eq!(out[0]["type"], "project_info");
        let info = &out[0]["info"];
        assert_eq!(info["total_files"], 1);
        assert_eq!(info["total_directories"], 0);
        assert_eq!(info["total_size"], 5);
        assert_eq!(info["websocket_status"], "connected");
    }

    #[test]
    fn no_watcher_code() {
        assert_eq!(CommandError::NoWatcher.code(), ErrorCode::WatchUnavailable);
        assert_eq!(
            CommandError::Internal("x".into()).code(),
            ErrorCode::InternalError
        );
    }
}
