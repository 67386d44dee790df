//! Control socket behind `reposync daemon status|stop`.
//!
//! One JSON object per line in each direction; every request line gets
//! exactly one reply line. The daemon side runs on Tokio, the client side is
//! blocking so the CLI needs no runtime for it.

use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, RwLock};

use crate::error::{io_err, DaemonError, UpdateError};
use crate::orchestrator::UpdateReport;
use crate::paths::socket_path;
use crate::state::{StateSnapshot, SyncState};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const STATUS_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlRequest {
    Status,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ControlReply {
    Status(DaemonStatus),
    Stopping,
    /// The request line could not be understood.
    Rejected { reason: String },
}

/// Everything `status` reports about a running daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub pid: u32,
    pub started_at_unix: i64,
    pub watch_dir: PathBuf,
    pub signal_socket: PathBuf,
    pub registries: StateSnapshot,
    pub updates: UpdateStats,
}

/// Running totals of finished update tickets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateStats {
    pub completed: u64,
    pub failed: u64,
    pub last: Option<UpdateReport>,
    pub last_at_unix: Option<i64>,
    pub last_error: Option<String>,
}

impl UpdateStats {
    /// Count one finished ticket. Failures are logged here and never
    /// propagate further.
    pub fn record(
        &mut self,
        path: &Path,
        outcome: Result<UpdateReport, UpdateError>,
        at_unix: i64,
    ) {
        self.last_at_unix = Some(at_unix);
        match outcome {
            Ok(report) => {
                self.completed += 1;
                self.last = Some(report);
            }
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "failed to update");
                self.failed += 1;
                self.last_error = Some(format!("{}: {err}", path.display()));
            }
        }
    }
}

/// Live daemon facts a `status` reply is assembled from.
#[derive(Clone)]
pub(crate) struct StatusBoard {
    pub started_at_unix: i64,
    pub watch_dir: PathBuf,
    pub signal_socket: PathBuf,
    pub state: SyncState,
    pub stats: Arc<RwLock<UpdateStats>>,
}

impl StatusBoard {
    async fn status(&self) -> DaemonStatus {
        DaemonStatus {
            pid: std::process::id(),
            started_at_unix: self.started_at_unix,
            watch_dir: self.watch_dir.clone(),
            signal_socket: self.signal_socket.clone(),
            registries: self.state.snapshot(),
            updates: self.stats.read().await.clone(),
        }
    }
}

/// Bind the control socket (mode 0600). A socket file left by a dead daemon
/// is replaced; one that still accepts connections is `AlreadyRunning`.
pub(crate) fn bind(socket: &Path) -> Result<UnixListener, DaemonError> {
    if let Some(dir) = socket.parent() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    if StdUnixStream::connect(socket).is_ok() {
        return Err(DaemonError::AlreadyRunning {
            socket: socket.to_path_buf(),
        });
    }
    match fs::remove_file(socket) {
        Ok(()) => tracing::debug!(socket = %socket.display(), "replaced stale control socket"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(io_err(socket, err)),
    }

    let listener = UnixListener::bind(socket).map_err(|e| io_err(socket, e))?;
    fs::set_permissions(socket, fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(socket, e))?;
    Ok(listener)
}

/// Answer control clients until shutdown. A `stop` request triggers the
/// shutdown after its reply is written.
pub(crate) async fn serve(
    listener: UnixListener,
    socket: PathBuf,
    board: StatusBoard,
    shutdown: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        let stream = tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(err) => {
                    tracing::warn!(error = %err, "control accept failed");
                    continue;
                }
            },
        };
        tokio::spawn(converse(stream, board.clone(), shutdown.clone()));
    }

    if let Err(err) = fs::remove_file(&socket) {
        if err.kind() != ErrorKind::NotFound {
            tracing::warn!(socket = %socket.display(), error = %err, "could not remove control socket");
        }
    }
    Ok(())
}

async fn converse(stream: UnixStream, board: StatusBoard, shutdown: broadcast::Sender<()>) {
    let (read, mut write) = stream.into_split();
    let mut lines = tokio::io::BufReader::new(read).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(err) => {
                tracing::debug!(error = %err, "control client read failed");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request = serde_json::from_str::<ControlRequest>(&line);
        let reply = match &request {
            Ok(ControlRequest::Status) => ControlReply::Status(board.status().await),
            Ok(ControlRequest::Stop) => ControlReply::Stopping,
            Err(err) => ControlReply::Rejected {
                reason: err.to_string(),
            },
        };
        if let Err(err) = write_line(&mut write, &reply).await {
            tracing::debug!(error = %err, "control client went away");
            return;
        }
        if matches!(request, Ok(ControlRequest::Stop)) {
            tracing::info!("stop requested over control socket");
            let _ = shutdown.send(());
            return;
        }
    }
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<(), DaemonError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| io_err("control socket", e))
}

/// Send one request to the daemon under `home` and read its reply.
pub fn exchange(home: &Path, request: ControlRequest) -> Result<ControlReply, DaemonError> {
    let socket = socket_path(home);
    let stream = StdUnixStream::connect(&socket).map_err(|err| match err.kind() {
        ErrorKind::NotFound | ErrorKind::ConnectionRefused => DaemonError::DaemonNotRunning {
            socket: socket.clone(),
        },
        _ => io_err(&socket, err),
    })?;
    stream
        .set_read_timeout(Some(REPLY_TIMEOUT))
        .map_err(|e| io_err(&socket, e))?;

    let mut line = serde_json::to_vec(&request)?;
    line.push(b'\n');
    (&stream).write_all(&line).map_err(|e| io_err(&socket, e))?;

    let mut reply = String::new();
    BufReader::new(&stream)
        .read_line(&mut reply)
        .map_err(|e| io_err(&socket, e))?;
    if reply.trim().is_empty() {
        return Err(DaemonError::Protocol(
            "daemon closed the connection without replying".to_string(),
        ));
    }
    Ok(serde_json::from_str(&reply)?)
}

/// Status of the running daemon. A daemon that has not bound its socket yet
/// gets a few retries with a doubling delay.
pub fn request_status(home: &Path) -> Result<DaemonStatus, DaemonError> {
    let mut delay = Duration::from_millis(50);
    let mut attempt = 1;
    loop {
        match exchange(home, ControlRequest::Status) {
            Ok(ControlReply::Status(status)) => return Ok(status),
            Ok(other) => return Err(unexpected(other)),
            Err(DaemonError::DaemonNotRunning { .. }) if attempt < STATUS_ATTEMPTS => {
                sleep(delay);
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    match exchange(home, ControlRequest::Stop)? {
        ControlReply::Stopping => Ok(()),
        other => Err(unexpected(other)),
    }
}

fn unexpected(reply: ControlReply) -> DaemonError {
    match reply {
        ControlReply::Rejected { reason } => DaemonError::Protocol(reason),
        other => DaemonError::Protocol(format!("unexpected reply: {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn board(root: &Path) -> StatusBoard {
        StatusBoard {
            started_at_unix: 1_700_000_000,
            watch_dir: root.join("tree"),
            signal_socket: root.join("fetch.sock"),
            state: SyncState::new(),
            stats: Arc::new(RwLock::new(UpdateStats::default())),
        }
    }

    fn report(timestamp: u64) -> UpdateReport {
        UpdateReport {
            name: "/a.txt".into(),
            retracted: None,
            published: format!("/a.txt/t={timestamp}"),
            timestamp,
            announced: true,
        }
    }

    #[test]
    fn wire_shapes() {
        assert_eq!(
            serde_json::to_value(ControlRequest::Status).unwrap(),
            json!({"cmd": "status"})
        );
        assert_eq!(
            serde_json::from_value::<ControlRequest>(json!({"cmd": "stop"})).unwrap(),
            ControlRequest::Stop
        );
        assert_eq!(
            serde_json::to_value(ControlReply::Stopping).unwrap(),
            json!({"reply": "stopping"})
        );
        assert!(serde_json::from_value::<ControlRequest>(json!({"cmd": "sync"})).is_err());
    }

    #[test]
    fn stats_count_successes_and_failures() {
        let mut stats = UpdateStats::default();
        let path = Path::new("/tree/a.txt");

        stats.record(
            path,
            Err(UpdateError::OutsideRoot {
                path: path.to_path_buf(),
                root: PathBuf::from("/other"),
            }),
            10,
        );
        stats.record(path, Ok(report(1)), 11);

        assert_eq!((stats.completed, stats.failed), (1, 1));
        assert_eq!(stats.last, Some(report(1)));
        assert_eq!(stats.last_at_unix, Some(11));
        assert!(stats.last_error.as_deref().unwrap_or("").contains("/tree/a.txt"));
    }

    #[test]
    fn missing_socket_reports_not_running() {
        let home = TempDir::new().unwrap();
        let err = exchange(home.path(), ControlRequest::Status).unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn status_then_stop_over_a_real_socket() {
        let home = TempDir::new().unwrap();
        let socket = socket_path(home.path());
        let board = board(home.path());
        board.stats.write().await.record(Path::new("/tree/a.txt"), Ok(report(7)), 12);

        let listener = bind(&socket).unwrap();
        let (shutdown, _) = broadcast::channel(1);
        let server = tokio::spawn(serve(
            listener,
            socket.clone(),
            board,
            shutdown.clone(),
            shutdown.subscribe(),
        ));

        let home_path = home.path().to_path_buf();
        let status = tokio::task::spawn_blocking(move || request_status(&home_path))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.pid, std::process::id());
        assert_eq!(status.watch_dir, home.path().join("tree"));
        assert_eq!(status.updates.completed, 1);
        assert_eq!(status.updates.last.map(|r| r.timestamp), Some(7));

        let home_path = home.path().to_path_buf();
        tokio::task::spawn_blocking(move || request_stop(&home_path))
            .await
            .unwrap()
            .unwrap();
        server.await.unwrap().unwrap();
        assert!(!socket.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn garbage_request_is_rejected_and_live_socket_is_not_stolen() {
        let home = TempDir::new().unwrap();
        let socket = socket_path(home.path());
        let listener = bind(&socket).unwrap();
        let (shutdown, _) = broadcast::channel(1);
        let server = tokio::spawn(serve(
            listener,
            socket.clone(),
            board(home.path()),
            shutdown.clone(),
            shutdown.subscribe(),
        ));

        assert!(matches!(
            bind(&socket),
            Err(DaemonError::AlreadyRunning { .. })
        ));

        let client_socket = socket.clone();
        let reply = tokio::task::spawn_blocking(move || {
            let stream = StdUnixStream::connect(&client_socket).unwrap();
            (&stream).write_all(b"{\"cmd\":\"reboot\"}\n").unwrap();
            let mut line = String::new();
            BufReader::new(&stream).read_line(&mut line).unwrap();
            serde_json::from_str::<ControlReply>(&line).unwrap()
        })
        .await
        .unwrap();
        assert!(matches!(reply, ControlReply::Rejected { .. }), "{reply:?}");

        shutdown.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
