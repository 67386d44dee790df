//! Shared registries for the watcher side of the daemon.
//!
//! Debounce timers and the fetch lock registry live behind one mutex. It is
//! only ever held around a registry mutation, never across an `.await`
//! or a task spawn.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;

use crate::locks::PathLockRegistry;

/// A scheduled stabilization for one path.
#[derive(Debug)]
pub(crate) struct PendingTimer {
    pub generation: u64,
    pub abort: Option<AbortHandle>,
}

#[derive(Debug, Default)]
pub(crate) struct Registries {
    pub timers: HashMap<PathBuf, PendingTimer>,
    pub locks: PathLockRegistry,
}

/// Cloneable handle passed to the debouncer, the lock coordinator, and the
/// status endpoint.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    inner: Arc<Mutex<Registries>>,
}

/// Point-in-time copy of the registries, sorted for stable output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub locked: Vec<PathBuf>,
    pub suppress_once: Vec<PathBuf>,
    pub pending: Vec<PathBuf>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut Registries) -> R) -> R {
        // Every mutation is a single set or map operation; poisoning is ignored.
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.with(|reg| {
            let mut pending: Vec<PathBuf> = reg.timers.keys().cloned().collect();
            pending.sort();
            StateSnapshot {
                locked: reg.locks.locked(),
                suppress_once: reg.locks.suppressed(),
                pending,
            }
        })
    }
}
