//! Fetch lock registry.
//!
//! A fetch client writing a file is indistinguishable from a local edit at
//! the filesystem level. It brackets the write with `LOCK:` / `UNLOCK:`
//! messages; while a path is locked every change on it is suppressed, and
//! after unlock exactly one more change is swallowed, because the fetch
//! reliably produces one trailing event after it reports completion.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::signal::SignalMessage;
use crate::state::SyncState;

/// Why a change event was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    /// A fetch is writing the path right now.
    Locked,
    /// The trailing event of a fetch that just finished.
    FetchedOnce,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PathLockRegistry {
    locked: HashSet<PathBuf>,
    suppress_once: HashSet<PathBuf>,
}

impl PathLockRegistry {
    pub fn lock(&mut self, path: PathBuf) {
        self.locked.insert(path);
    }

    pub fn unlock(&mut self, path: PathBuf) {
        self.locked.remove(&path);
        self.suppress_once.insert(path);
    }

    /// Decide whether a change on `path` is self-inflicted.
    ///
    /// A locked path is suppressed without consuming anything; otherwise a
    /// pending suppress-once entry is consumed.
    pub fn check(&mut self, path: &Path) -> Option<Suppression> {
        if self.locked.contains(path) {
            return Some(Suppression::Locked);
        }
        if self.suppress_once.remove(path) {
            return Some(Suppression::FetchedOnce);
        }
        None
    }

    pub fn locked(&self) -> Vec<PathBuf> {
        sorted(&self.locked)
    }

    pub fn suppressed(&self) -> Vec<PathBuf> {
        sorted(&self.suppress_once)
    }
}

fn sorted(set: &HashSet<PathBuf>) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = set.iter().cloned().collect();
    paths.sort();
    paths
}

/// Applies signaling messages to the shared registry.
#[derive(Debug, Clone)]
pub struct LockCoordinator {
    state: SyncState,
}

impl LockCoordinator {
    pub fn new(state: SyncState) -> Self {
        Self { state }
    }

    pub fn apply(&self, message: SignalMessage) {
        match message {
            SignalMessage::Lock(path) => {
                tracing::info!(path = %path.display(), "locked by fetch");
                self.state.with(|reg| reg.locks.lock(path));
            }
            SignalMessage::Unlock(path) => {
                tracing::info!(path = %path.display(), "unlocked by fetch");
                self.state.with(|reg| reg.locks.unlock(path));
            }
        }
    }
}
