//! Per-path debounce.
//!
//! Every raw change event restarts the path's quiet-interval timer; only the
//! timer that survives the full interval fires. At most one timer is live per
//! path. When it fires, the lock registry is consulted under the same mutex
//! and the path is either handed to the update processor or dropped as
//! self-inflicted.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::locks::Suppression;
use crate::state::{PendingTimer, SyncState};

enum Fired {
    Stabilized,
    Suppressed(Suppression),
    Superseded,
}

#[derive(Debug)]
pub struct Debouncer {
    state: SyncState,
    quiet: Duration,
    stabilized: mpsc::UnboundedSender<PathBuf>,
    generation: AtomicU64,
}

impl Debouncer {
    pub fn new(
        state: SyncState,
        quiet: Duration,
        stabilized: mpsc::UnboundedSender<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            quiet,
            stabilized,
            generation: AtomicU64::new(0),
        })
    }

    /// Record one change event for `path`. Returns `false` when the event was
    /// dropped outright (hidden or temporary file, or a quiet interval too
    /// long to schedule).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn notify(self: &Arc<Self>, path: &Path) -> bool {
        if is_hidden(path) {
            tracing::trace!(path = %path.display(), "ignoring hidden file");
            return false;
        }

        let Some(deadline) = Instant::now().checked_add(self.quiet) else {
            tracing::error!(path = %path.display(), quiet = ?self.quiet, "debounce interval out of range");
            return false;
        };
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let path = path.to_path_buf();

        // Register before spawning so the timer can never fire ahead of its entry.
        let replaced = self.state.with(|reg| {
            reg.timers.insert(
                path.clone(),
                PendingTimer {
                    generation,
                    abort: None,
                },
            )
        });
        if let Some(abort) = replaced.and_then(|old| old.abort) {
            abort.abort();
        }

        let this = Arc::clone(self);
        let timer_path = path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            this.fire(timer_path, generation);
        });

        let orphan = self.state.with(|reg| match reg.timers.get_mut(&path) {
            Some(timer) if timer.generation == generation => {
                timer.abort = Some(handle.abort_handle());
                false
            }
            _ => true,
        });
        if orphan {
            handle.abort();
        }
        true
    }

    fn fire(&self, path: PathBuf, generation: u64) {
        let fired = self.state.with(|reg| {
            match reg.timers.get(&path) {
                Some(timer) if timer.generation == generation => {
                    reg.timers.remove(&path);
                }
                _ => return Fired::Superseded,
            }
            match reg.locks.check(&path) {
                Some(reason) => Fired::Suppressed(reason),
                None => Fired::Stabilized,
            }
        });

        match fired {
            Fired::Stabilized => {
                tracing::info!(path = %path.display(), "file stabilized after debounce");
                if self.stabilized.send(path).is_err() {
                    tracing::warn!("update processor gone; dropping stabilized path");
                }
            }
            Fired::Suppressed(Suppression::Locked) => {
                tracing::info!(path = %path.display(), "skip: locked by fetch");
            }
            Fired::Suppressed(Suppression::FetchedOnce) => {
                tracing::info!(path = %path.display(), "skip: written by fetch");
            }
            Fired::Superseded => {}
        }
    }

    pub fn pending(&self) -> usize {
        self.state.with(|reg| reg.timers.len())
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}
