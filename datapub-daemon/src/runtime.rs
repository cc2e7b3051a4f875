//! Daemon runtime: worker pool, Unix-socket server and shutdown fan-out.
//!
//! One [`Daemon`] value is shared by every client connection. Requests are
//! JSON lines; each gets exactly one JSON-line response. `stop` is answered
//! before shutdown is broadcast so the client always sees the ack.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use datapub_core::{config, DaemonConfig, DatasetId, DatasetStore, PublishConfig, SnapshotTag};
use datapub_publish::{Orchestrator, SiblingResolver};
use datapub_remote::providers_from_config;
use datapub_store::LocalStore;

use crate::error::{io_err, DaemonError};
use crate::paths::{run_dir, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::queue::{
    spawn_workers, OrchestratorExecutor, PublishExecutor, RetryPolicy, TaskQueue,
};

const QUEUE_CAPACITY: usize = 256;

/// Realm used when a publish request does not name one.
const DEFAULT_REALM: &str = "PRIVATE";

/// Load `~/.datapub/config.yaml`, start the runtime and block until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let config = config::load_at(home)?.with_env_overrides();
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio runtime", e))?
        .block_on(run(home.to_path_buf(), config))
}

/// Run the daemon against the local store and the configured providers.
pub async fn run(home: PathBuf, config: PublishConfig) -> Result<(), DaemonError> {
    let store: Arc<dyn DatasetStore> = Arc::new(LocalStore::new(&config.store_root));
    let providers = providers_from_config(&config);
    let resolver = SiblingResolver::new(&config, providers.hosted_git, providers.object_storage);
    let executor = Arc::new(OrchestratorExecutor::new(Orchestrator::new(resolver), store));
    tracing::info!(
        store = %config.store_root.display(),
        workers = config.daemon.workers,
        "starting publish daemon"
    );
    serve(home, config.daemon, executor).await
}

/// Run the queue, workers and socket server with an explicit executor.
pub async fn serve(
    home: PathBuf,
    daemon: DaemonConfig,
    executor: Arc<dyn PublishExecutor>,
) -> Result<(), DaemonError> {
    let run = run_dir(&home);
    fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    let socket = socket_path(&home);
    let listener = bind_socket(&socket)?;

    let (queue, task_rx) = TaskQueue::new(QUEUE_CAPACITY);
    let (shutdown, mut stopped) = broadcast::channel::<()>(4);
    let workers = spawn_workers(
        daemon.workers,
        queue.clone(),
        task_rx,
        executor,
        RetryPolicy::from(&daemon),
        &shutdown,
    );

    let state = Arc::new(Daemon {
        socket: socket.clone(),
        queue,
        config: daemon,
        started_at: Utc::now(),
        shutdown,
    });
    let accept = tokio::spawn(state.clone().accept_loop(listener));

    tokio::select! {
        _ = stopped.recv() => {}
        interrupted = tokio::signal::ctrl_c() => {
            interrupted.map_err(|e| io_err("ctrl-c handler", e))?;
            tracing::info!("interrupted; stopping publish daemon");
            let _ = state.shutdown.send(());
        }
    }

    let served = accept
        .await
        .map_err(|e| DaemonError::Protocol(format!("socket server panicked: {e}")))?;
    if let Err(err) = fs::remove_file(&socket) {
        if err.kind() != ErrorKind::NotFound {
            tracing::warn!(socket = %socket.display(), error = %err, "could not remove socket");
        }
    }
    for worker in workers {
        if let Err(err) = worker.await {
            tracing::warn!(error = %err, "publish worker ended abnormally");
        }
    }
    tracing::info!("publish daemon stopped");
    served
}

/// State shared by every connection.
struct Daemon {
    socket: PathBuf,
    queue: TaskQueue,
    config: DaemonConfig,
    started_at: DateTime<Utc>,
    shutdown: broadcast::Sender<()>,
}

impl Daemon {
    async fn accept_loop(self: Arc<Self>, listener: UnixListener) -> Result<(), DaemonError> {
        let mut stopped = self.shutdown.subscribe();
        let result = loop {
            let stream = tokio::select! {
                _ = stopped.recv() => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(err) => break Err(io_err(&self.socket, err)),
                },
            };
            let daemon = self.clone();
            tokio::spawn(async move {
                if let Err(err) = daemon.serve_client(stream).await {
                    tracing::warn!(error = %err, "client connection failed");
                }
            });
        };
        // An accept failure must still wake `serve`.
        let _ = self.shutdown.send(());
        result
    }

    async fn serve_client(&self, stream: UnixStream) -> Result<(), DaemonError> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .await
                .map_err(|e| io_err(&self.socket, e))?;
            if read == 0 {
                return Ok(());
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let (response, stop) = match serde_json::from_str::<DaemonRequest>(trimmed) {
                Ok(request) => (self.dispatch(&request).await, request.cmd == "stop"),
                Err(err) => (DaemonResponse::error(format!("malformed request: {err}")), false),
            };
            let mut payload = serde_json::to_vec(&response)?;
            payload.push(b'\n');
            write_half
                .write_all(&payload)
                .await
                .map_err(|e| io_err(&self.socket, e))?;

            if stop {
                tracing::info!("stop requested over socket");
                let _ = self.shutdown.send(());
                return Ok(());
            }
        }
    }

    async fn dispatch(&self, request: &DaemonRequest) -> DaemonResponse {
        match request.cmd.as_str() {
            "status" => DaemonResponse::ok(self.status().await),
            "publish" => self.publish(request).await,
            "task" => {
                let Some(id) = request.task_id else {
                    return DaemonResponse::error("task requires task_id");
                };
                match self.queue.get(id).await {
                    Some(record) => DaemonResponse::ok(json!(record)),
                    None => DaemonResponse::error(format!("unknown task {id}")),
                }
            }
            "stop" => DaemonResponse::ok(json!({ "stopping": true })),
            other => DaemonResponse::error(format!("unsupported command '{other}'")),
        }
    }

    async fn publish(&self, request: &DaemonRequest) -> DaemonResponse {
        let (Some(dataset), Some(snapshot)) = (&request.dataset, &request.snapshot) else {
            return DaemonResponse::error("publish requires dataset and snapshot");
        };
        let realm = request.realm.as_deref().unwrap_or(DEFAULT_REALM);
        let queued = self
            .queue
            .enqueue(
                DatasetId::from(dataset.as_str()),
                SnapshotTag::from(snapshot.as_str()),
                realm,
            )
            .await;
        match queued {
            Ok(id) => DaemonResponse::ok(json!({ "task_id": id })),
            Err(err) => DaemonResponse::error(err.to_string()),
        }
    }

    async fn status(&self) -> Value {
        json!({
            "running": true,
            "started_at": self.started_at.to_rfc3339(),
            "workers": self.config.workers,
            "max_attempts": self.config.max_attempts,
            "socket": self.socket.display().to_string(),
            "tasks": self.queue.list().await,
        })
    }
}

/// Bind the daemon socket with mode 0600.
///
/// A leftover socket file nobody answers on is removed first; a live one
/// means another daemon owns this home.
fn bind_socket(socket: &Path) -> Result<UnixListener, DaemonError> {
    if socket.exists() {
        if std::os::unix::net::UnixStream::connect(socket).is_ok() {
            return Err(DaemonError::Protocol(format!(
                "another daemon is listening on {}",
                socket.display()
            )));
        }
        tracing::warn!(socket = %socket.display(), "removing stale socket");
        match fs::remove_file(socket) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(socket, err)),
        }
    }

    let listener = UnixListener::bind(socket).map_err(|e| io_err(socket, e))?;
    restrict_permissions(socket)?;
    tracing::info!(socket = %socket.display(), "listening");
    Ok(listener)
}

#[cfg(unix)]
fn restrict_permissions(socket: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(socket, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(socket, e))
}

#[cfg(not(unix))]
fn restrict_permissions(_socket: &Path) -> Result<(), DaemonError> {
    Ok(())
}

/// `RUST_LOG` filter, default `info`; `DATAPUB_LOG_FORMAT=json` switches to
/// JSON lines.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let json = std::env::var("DATAPUB_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.with_target(false).try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    use crate::queue::PublishTask;

    /// The receiver is returned so the queue stays open.
    fn daemon(home: &Path) -> (Daemon, mpsc::Receiver<PublishTask>) {
        let (queue, rx) = TaskQueue::new(4);
        let (shutdown, _) = broadcast::channel(1);
        let daemon = Daemon {
            socket: socket_path(home),
            queue,
            config: DaemonConfig::default(),
            started_at: Utc::now(),
            shutdown,
        };
        (daemon, rx)
    }

    fn publish_request(snapshot: Option<&str>, realm: Option<&str>) -> DaemonRequest {
        DaemonRequest {
            dataset: Some("ds1".into()),
            snapshot: snapshot.map(Into::into),
            realm: realm.map(Into::into),
            ..DaemonRequest::command("publish")
        }
    }

    #[tokio::test]
    async fn status_reports_queued_tasks() {
        let home = TempDir::new().expect("home");
        let (daemon, _rx) = daemon(home.path());
        let queued = daemon
            .dispatch(&publish_request(Some("v1"), Some("PUBLIC")))
            .await;
        assert!(queued.ok, "{:?}", queued.error);

        let status = daemon.dispatch(&DaemonRequest::command("status")).await;
        let payload = status.data.expect("status data");
        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["workers"], json!(2));
        let tasks = payload["tasks"].as_array().expect("tasks array");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["status"], json!("queued"));
        assert_eq!(tasks[0]["realm"], json!("PUBLIC"));
    }

    #[tokio::test]
    async fn publish_without_snapshot_is_rejected() {
        let home = TempDir::new().expect("home");
        let (daemon, _rx) = daemon(home.path());
        let response = daemon.dispatch(&publish_request(None, None)).await;
        assert!(!response.ok);
        assert!(daemon.queue.list().await.is_empty());
    }

    #[tokio::test]
    async fn publish_defaults_to_private_realm() {
        let home = TempDir::new().expect("home");
        let (daemon, _rx) = daemon(home.path());
        let response = daemon.dispatch(&publish_request(Some("v1"), None)).await;
        assert_eq!(response.data.expect("ack")["task_id"], json!(1));
        assert_eq!(daemon.queue.list().await[0].realm, datapub_core::Realm::Private);
    }

    #[tokio::test]
    async fn unknown_command_and_task_are_errors() {
        let home = TempDir::new().expect("home");
        let (daemon, _rx) = daemon(home.path());
        let response = daemon.dispatch(&DaemonRequest::command("reload")).await;
        assert_eq!(response.error.as_deref(), Some("unsupported command 'reload'"));

        let missing = DaemonRequest {
            task_id: Some(crate::TaskId(42)),
            ..DaemonRequest::command("task")
        };
        assert!(!daemon.dispatch(&missing).await.ok);
    }

    #[tokio::test]
    async fn stale_socket_file_is_replaced() {
        use std::os::unix::fs::{FileTypeExt, PermissionsExt};

        let dir = TempDir::new().expect("dir");
        let socket = dir.path().join("daemon.sock");
        fs::write(&socket, b"").expect("stale file");
        let _listener = bind_socket(&socket).expect("bind");

        let meta = fs::metadata(&socket).expect("metadata");
        assert!(meta.file_type().is_socket());
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[tokio::test]
    async fn live_socket_is_not_stolen() {
        let dir = TempDir::new().expect("dir");
        let socket = dir.path().join("daemon.sock");
        let _first = bind_socket(&socket).expect("first bind");
        let err = bind_socket(&socket).unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(m) if m.contains("another daemon")));
    }
}
