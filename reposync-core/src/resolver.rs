//! Latest-version lookup.
//!
//! The repository has no "latest" query, so every lookup lists all stored
//! keys, renders each one, and keeps the highest timestamp among names that
//! start with the requested prefix. Keys that fail to decode are logged and
//! skipped; they never abort the scan.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::client::Repository;
use crate::config::{NameTypes, SyncConfig};
use crate::error::ClientError;
use crate::name::{self, VersionedName};

/// Bounds for the commit confirmation poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl CommitPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            initial_interval: Duration::from_millis(config.commit_poll_ms.max(1)),
            max_interval: Duration::from_millis(config.commit_poll_max_ms.max(config.commit_poll_ms)),
            timeout: Duration::from_millis(config.commit_timeout_ms),
        }
    }
}

impl Default for CommitPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// Result of waiting for the repository to expose a freshly inserted version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(VersionedName),
    TimedOut { waited: Duration },
}

#[derive(Clone)]
pub struct VersionResolver {
    repo: Arc<dyn Repository>,
    types: NameTypes,
}

impl VersionResolver {
    pub fn new(repo: Arc<dyn Repository>, types: NameTypes) -> Self {
        Self { repo, types }
    }

    /// Latest timestamped name under `prefix`, surfacing repository failures.
    pub async fn try_latest_version(
        &self,
        prefix: &str,
    ) -> Result<Option<VersionedName>, ClientError> {
        let keys = self.repo.list_all_keys().await?;
        Ok(select_latest(&keys, prefix, &self.types))
    }

    /// Latest timestamped name under `prefix`; an unavailable repository
    /// is logged and reads as "no version".
    pub async fn latest_version(&self, prefix: &str) -> Option<VersionedName> {
        match self.try_latest_version(prefix).await {
            Ok(latest) => latest,
            Err(err) => {
                tracing::warn!(prefix, error = %err, "could not read keys from repository");
                None
            }
        }
    }

    /// Poll until the latest name under `prefix` carries `timestamp`.
    ///
    /// The interval doubles after every miss up to `policy.max_interval`.
    pub async fn await_commit(
        &self,
        prefix: &str,
        timestamp: u64,
        policy: &CommitPolicy,
    ) -> CommitOutcome {
        let started = Instant::now();
        let mut interval = policy.initial_interval;

        loop {
            if let Some(latest) = self.latest_version(prefix).await {
                if latest.has_timestamp(timestamp) {
                    tracing::debug!(name = %latest, waited_ms = started.elapsed().as_millis(), "commit confirmed");
                    return CommitOutcome::Committed(latest);
                }
            }

            let waited = started.elapsed();
            if waited >= policy.timeout {
                return CommitOutcome::TimedOut { waited };
            }
            tokio::time::sleep(interval.min(policy.timeout - waited)).await;
            interval = interval.saturating_mul(2).min(policy.max_interval);
        }
    }
}

/// Pick the maximal timestamp among rendered keys starting with `prefix`.
///
/// Ties keep the first maximal entry in scan order.
pub fn select_latest(keys: &[Vec<u8>], prefix: &str, types: &NameTypes) -> Option<VersionedName> {
    let mut latest: Option<VersionedName> = None;

    for key in keys {
        let rendered = match name::decode_rendered(key, types) {
            Ok(rendered) => rendered,
            Err(err) => {
                tracing::warn!(key = %hex::encode(key), error = %err, "skipping malformed key");
                continue;
            }
        };
        let Some(candidate) = rendered.into_versioned() else {
            continue;
        };
        if !candidate.uri.starts_with(prefix) {
            continue;
        }
        match &latest {
            Some(best) if best.timestamp >= candidate.timestamp => {}
            _ => latest = Some(candidate),
        }
    }

    latest
}
