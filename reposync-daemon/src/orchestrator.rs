//! Update state machine.
//!
//! ```text
//! Stabilized → Acquire(update lock) → ResolveOld → RetractOld → InvalidateCache
//!            → PublishNew → AwaitCommit → NotifyPeers → Release
//! ```
//!
//! One update is in flight across the whole daemon at a time: the update
//! lock is held for the full sequence, so the repository never sees two
//! retract/publish pairs from this node interleave. For a single path the
//! old version is retracted strictly before the new one is published, and
//! the new one is confirmed committed strictly before peers hear about it.
//!
//! A failure in any mutating step abandons the ticket. Nothing is rolled
//! back; the file stays unsynchronized until its next edit.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use reposync_core::{
    Clock, CommitOutcome, CommitPolicy, ContentCache, NameTypes, PeerSync, Repository,
    VersionResolver, VersionedName,
};

use crate::error::UpdateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStage {
    ResolveOld,
    RetractOld,
    InvalidateCache,
    PublishNew,
    AwaitCommit,
    NotifyPeers,
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UpdateStage::ResolveOld => "resolve-old",
            UpdateStage::RetractOld => "retract-old",
            UpdateStage::InvalidateCache => "invalidate-cache",
            UpdateStage::PublishNew => "publish-new",
            UpdateStage::AwaitCommit => "await-commit",
            UpdateStage::NotifyPeers => "notify-peers",
        };
        f.write_str(label)
    }
}

/// The external systems an update talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub repo: Arc<dyn Repository>,
    pub cache: Arc<dyn ContentCache>,
    pub peers: Arc<dyn PeerSync>,
    pub clock: Arc<dyn Clock>,
}

/// Outcome of one completed update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReport {
    pub name: String,
    pub retracted: Option<String>,
    pub published: String,
    pub timestamp: u64,
    /// `false` when the announcement failed; the version is still committed.
    pub announced: bool,
}

/// Working state of one in-flight update.
struct UpdateTicket<'a> {
    path: &'a Path,
    name: String,
    stage: UpdateStage,
}

impl UpdateTicket<'_> {
    fn enter(&mut self, stage: UpdateStage) {
        self.stage = stage;
        tracing::debug!(name = %self.name, stage = %stage, "update stage");
    }

    fn failed(&self, source: reposync_core::ClientError) -> UpdateError {
        UpdateError::MutationFailed {
            stage: self.stage,
            name: self.name.clone(),
            source,
        }
    }

    // Names are matched at a component boundary so `/a/b.txt` never picks
    // up versions of `/a/b.txt.bak`.
    fn version_prefix(&self) -> String {
        format!("{}/", self.name)
    }
}

pub struct UpdateOrchestrator {
    watch_root: PathBuf,
    collaborators: Collaborators,
    resolver: VersionResolver,
    commit: CommitPolicy,
    update_lock: Mutex<()>,
}

impl UpdateOrchestrator {
    pub fn new(
        watch_root: impl Into<PathBuf>,
        types: NameTypes,
        collaborators: Collaborators,
        commit: CommitPolicy,
    ) -> Self {
        let resolver = VersionResolver::new(collaborators.repo.clone(), types);
        Self {
            watch_root: watch_root.into(),
            collaborators,
            resolver,
            commit,
            update_lock: Mutex::new(()),
        }
    }

    /// Repository name for a file: its path relative to the watched root,
    /// with a leading slash and forward slashes.
    pub fn name_for(&self, path: &Path) -> Result<String, UpdateError> {
        let outside = || UpdateError::OutsideRoot {
            path: path.to_path_buf(),
            root: self.watch_root.clone(),
        };
        let relative = path.strip_prefix(&self.watch_root).map_err(|_| outside())?;

        let mut name = String::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    name.push('/');
                    name.push_str(&part.to_string_lossy());
                }
                _ => return Err(outside()),
            }
        }
        if name.is_empty() {
            return Err(outside());
        }
        Ok(name)
    }

    /// Run the full update sequence for one stabilized file.
    pub async fn update(&self, path: &Path) -> Result<UpdateReport, UpdateError> {
        let mut ticket = UpdateTicket {
            path,
            name: self.name_for(path)?,
            stage: UpdateStage::ResolveOld,
        };

        let _guard = self.update_lock.lock().await;
        tracing::info!(path = %path.display(), name = %ticket.name, "update started");

        let old = self.resolver.latest_version(&ticket.version_prefix()).await;

        ticket.enter(UpdateStage::RetractOld);
        let retracted = match old {
            Some(old) => {
                self.collaborators
                    .repo
                    .delete(&old.uri)
                    .await
                    .map_err(|err| ticket.failed(err))?;
                tracing::info!(name = %old, "retracted previous version");
                Some(old.uri)
            }
            None => {
                tracing::info!(name = %ticket.name, "no previous version found");
                None
            }
        };

        ticket.enter(UpdateStage::InvalidateCache);
        if let Err(err) = self.collaborators.cache.erase(&ticket.name).await {
            tracing::warn!(name = %ticket.name, error = %err, "cache erase failed; continuing");
        }

        ticket.enter(UpdateStage::PublishNew);
        let content = tokio::fs::read(ticket.path)
            .await
            .map_err(|source| UpdateError::Read {
                path: ticket.path.to_path_buf(),
                source,
            })?;
        let timestamp = self.collaborators.clock.now_secs();
        self.collaborators
            .repo
            .insert(&ticket.name, &content, timestamp)
            .await
            .map_err(|err| ticket.failed(err))?;

        ticket.enter(UpdateStage::AwaitCommit);
        tracing::info!(name = %ticket.name, timestamp, "waiting for repository commit");
        let published = match self
            .resolver
            .await_commit(&ticket.version_prefix(), timestamp, &self.commit)
            .await
        {
            CommitOutcome::Committed(name) => name,
            CommitOutcome::TimedOut { waited } => {
                return Err(UpdateError::CommitTimedOut {
                    name: ticket.name,
                    timestamp,
                    waited,
                });
            }
        };

        ticket.enter(UpdateStage::NotifyPeers);
        let versioned = VersionedName::compose(&ticket.name, timestamp);
        let announced = match self.collaborators.peers.announce(&versioned.uri).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(name = %versioned, error = %err, "peer announcement failed");
                false
            }
        };

        tracing::info!(name = %published, announced, "update complete");
        Ok(UpdateReport {
            name: ticket.name,
            retracted,
            published: published.uri,
            timestamp,
            announced,
        })
    }
}
