use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use notify::event::{ModifyKind, RenameMode};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinSet;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use reposync_core::config::config_path_at;
use reposync_core::{CommandClient, CommitPolicy, SyncConfig, SystemClock};

use crate::control::{self, StatusBoard, UpdateStats};
use crate::debounce::Debouncer;
use crate::error::{io_err, DaemonError};
use crate::locks::LockCoordinator;
use crate::orchestrator::{Collaborators, UpdateOrchestrator};
use crate::paths::{reposync_root, socket_path};
use crate::signal;
use crate::state::SyncState;

/// Filter directives, e.g. `REPOSYNC_LOG=reposync_daemon=debug`.
const LOG_ENV: &str = "REPOSYNC_LOG";
/// `json` switches the daemon log to one JSON object per line.
const LOG_FORMAT_ENV: &str = "REPOSYNC_LOG_FORMAT";

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, config: SyncConfig) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config))
}

/// Run the daemon with command-backed collaborators.
pub async fn run(home: PathBuf, config: SyncConfig) -> Result<(), DaemonError> {
    let client = Arc::new(CommandClient::from_config(&config));
    let collaborators = Collaborators {
        repo: client.clone(),
        cache: client.clone(),
        peers: client,
        clock: Arc::new(SystemClock),
    };
    run_with(home, config, collaborators).await
}

/// Run the daemon against the given collaborators until ctrl-c or `stop`.
pub async fn run_with(
    home: PathBuf,
    config: SyncConfig,
    collaborators: Collaborators,
) -> Result<(), DaemonError> {
    config.validate(&config_path_at(&home))?;
    let root = prepare_watch_root(&config.watch_dir)?;
    let home_dir = reposync_root(&home);
    fs::create_dir_all(&home_dir).map_err(|e| io_err(&home_dir, e))?;

    let state = SyncState::new();
    let board = StatusBoard {
        started_at_unix: Utc::now().timestamp(),
        watch_dir: root.clone(),
        signal_socket: config.signal_socket.clone(),
        state: state.clone(),
        stats: Arc::new(RwLock::new(UpdateStats::default())),
    };

    let orchestrator = Arc::new(UpdateOrchestrator::new(
        root.clone(),
        config.name_types,
        collaborators,
        CommitPolicy::from_config(&config),
    ));

    let (stabilized_tx, stabilized_rx) = mpsc::unbounded_channel::<PathBuf>();
    let debouncer = Debouncer::new(state.clone(), config.debounce(), stabilized_tx);

    // Both sockets are bound before any task runs, so a client that sees
    // `run_with` in progress can already reach them.
    let datagrams = signal::bind(&config.signal_socket)?;
    let control_socket = socket_path(&home);
    let listener = match control::bind(&control_socket) {
        Ok(listener) => listener,
        Err(err) => {
            let _ = fs::remove_file(&config.signal_socket);
            return Err(err);
        }
    };

    let mut supervisor = Supervisor::new();
    // Subscribe every task before the first one can broadcast shutdown.
    let watcher_rx = supervisor.subscribe();
    let signal_rx = supervisor.subscribe();
    let processor_rx = supervisor.subscribe();
    let control_rx = supervisor.subscribe();
    let ctrl_c_rx = supervisor.subscribe();
    let shutdown = supervisor.shutdown.clone();

    supervisor.spawn("watcher", watcher_task(root.clone(), debouncer, watcher_rx));
    supervisor.spawn(
        "signal_listener",
        signal::listen(
            datagrams,
            config.signal_socket.clone(),
            LockCoordinator::new(state),
            signal_rx,
        ),
    );
    supervisor.spawn(
        "update_processor",
        update_processor_task(orchestrator, board.stats.clone(), stabilized_rx, processor_rx),
    );
    supervisor.spawn(
        "control_server",
        control::serve(listener, control_socket, board, shutdown, control_rx),
    );
    supervisor.spawn("ctrl_c", ctrl_c_task(ctrl_c_rx));

    tracing::info!(root = %root.display(), "watching");
    supervisor.wait().await
}

/// Named daemon tasks sharing one shutdown broadcast. Whichever task ends
/// first, for any reason, takes the others down with it.
struct Supervisor {
    tasks: JoinSet<(&'static str, Result<(), DaemonError>)>,
    shutdown: broadcast::Sender<()>,
}

impl Supervisor {
    fn new() -> Self {
        let (shutdown, _) = broadcast::channel(16);
        Self {
            tasks: JoinSet::new(),
            shutdown,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), DaemonError>> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        self.tasks.spawn(async move {
            let result = task.await;
            tracing::debug!(task = name, ok = result.is_ok(), "daemon task finished");
            let _ = shutdown.send(());
            (name, result)
        });
    }

    /// Wait for every task. Every failure is logged and the first is returned.
    async fn wait(mut self) -> Result<(), DaemonError> {
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            let (task, result) = match joined {
                Ok(finished) => finished,
                // The wrapper never ran to its own shutdown send.
                Err(err) => {
                    let _ = self.shutdown.send(());
                    ("unknown", Err(DaemonError::TaskFailed(err.to_string())))
                }
            };
            if let Err(err) = result {
                tracing::error!(task, error = %err, "daemon task failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

async fn ctrl_c_task(mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), DaemonError> {
    tokio::select! {
        _ = shutdown_rx.recv() => Ok(()),
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|e| io_err("ctrl-c handler", e))?;
            tracing::info!("received ctrl-c, shutting down daemon");
            Ok(())
        }
    }
}

fn prepare_watch_root(dir: &Path) -> Result<PathBuf, DaemonError> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    // Event paths arrive in canonical form (e.g. /private/var on macOS).
    fs::canonicalize(dir).map_err(|e| io_err(dir, e))
}

async fn watcher_task(
    root: PathBuf,
    debouncer: Arc<Debouncer>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                for path in changed_paths(&event) {
                    if path.is_dir() {
                        continue;
                    }
                    let path = signal::resolve_path(&path);
                    if !path.starts_with(&root) {
                        continue;
                    }
                    debouncer.notify(&path);
                }
            }
        }
    }

    Ok(())
}

/// Paths an event reports as changed. Renames count at their destination.
fn changed_paths(event: &Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.last().cloned().into_iter().collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Vec::new(),
        EventKind::Modify(_) => event.paths.clone(),
        _ => Vec::new(),
    }
}

async fn update_processor_task(
    orchestrator: Arc<UpdateOrchestrator>,
    stats: Arc<RwLock<UpdateStats>>,
    mut stabilized_rx: mpsc::UnboundedReceiver<PathBuf>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            path = stabilized_rx.recv() => {
                let Some(path) = path else { break };
                let orchestrator = orchestrator.clone();
                let stats = stats.clone();
                // The orchestrator's update lock keeps these sequential.
                tokio::spawn(async move {
                    let outcome = orchestrator.update(&path).await;
                    stats.write().await.record(&path, outcome, Utc::now().timestamp());
                });
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = if json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.compact().try_init()
    };
}
