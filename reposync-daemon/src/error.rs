use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use reposync_core::{ClientError, ConfigError};

use crate::orchestrator::UpdateStage;

/// Error surface for the daemon runtime and its control protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },

    #[error("another daemon is already listening on {socket}")]
    AlreadyRunning { socket: PathBuf },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("daemon task ended abnormally: {0}")]
    TaskFailed(String),
}

/// Failures on the `LOCK:` / `UNLOCK:` datagram channel. Never fatal.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("unrecognized signal message {0:?}")]
    Unrecognized(String),

    #[error("signal message carries an empty path")]
    EmptyPath,

    #[error("signal message is not valid UTF-8")]
    NotUtf8,

    #[error("signal socket {socket}: {source}")]
    Io {
        socket: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why one update ticket was abandoned. The repository is left as the
/// failed step found it.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("{path} is not inside the watched root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} failed for {name}: {source}")]
    MutationFailed {
        stage: UpdateStage,
        name: String,
        #[source]
        source: ClientError,
    },

    #[error("repository did not confirm {name}/t={timestamp} within {waited:?}")]
    CommitTimedOut {
        name: String,
        timestamp: u64,
        waited: Duration,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
