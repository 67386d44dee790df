//! Reposync daemon: watcher + debounce, fetch lock signaling, serialized
//! update orchestration, control socket.

pub mod control;
pub mod debounce;
mod error;
pub mod locks;
pub mod orchestrator;
pub mod paths;
mod runtime;
pub mod signal;
pub mod state;

pub use control::{
    request_status, request_stop, ControlReply, ControlRequest, DaemonStatus, UpdateStats,
};
pub use debounce::Debouncer;
pub use error::{DaemonError, SignalError, UpdateError};
pub use locks::{LockCoordinator, PathLockRegistry, Suppression};
pub use orchestrator::{Collaborators, UpdateOrchestrator, UpdateReport, UpdateStage};
pub use runtime::{run, run_with, start_blocking};
pub use signal::{send_signal, SignalMessage};
pub use state::{StateSnapshot, SyncState};
