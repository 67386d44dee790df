//! Collaborator clients.
//!
//! The daemon never touches the content repository, the forwarder cache, or
//! the peer-sync transport directly. Each one is reached through a narrow
//! trait returning `Result<_, ClientError>` so the orchestrator can branch on
//! the outcome. [`CommandClient`] backs all three with the argv templates
//! from [`CommandTemplates`].

use std::io::Write;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;

use crate::config::{CommandTemplates, SyncConfig};
use crate::error::ClientError;

/// The content repository: key listing plus insert / delete.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Every stored key as raw bytes. No snapshot isolation is implied.
    async fn list_all_keys(&self) -> Result<Vec<Vec<u8>>, ClientError>;

    /// Store `content` under `name` with the given timestamp component.
    async fn insert(&self, name: &str, content: &[u8], timestamp: u64) -> Result<(), ClientError>;

    /// Remove a stored (versioned) name.
    async fn delete(&self, name: &str) -> Result<(), ClientError>;
}

/// The forwarding daemon's content store.
#[async_trait]
pub trait ContentCache: Send + Sync {
    async fn erase(&self, prefix: &str) -> Result<(), ClientError>;
}

/// The transport announcing new versions to other nodes.
#[async_trait]
pub trait PeerSync: Send + Sync {
    async fn announce(&self, versioned_name: &str) -> Result<(), ClientError>;
}

/// Source of publication timestamps, in Unix seconds.
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        u64::try_from(Utc::now().timestamp()).unwrap_or_default()
    }
}

/// Runs external programs for every collaborator operation.
#[derive(Debug, Clone)]
pub struct CommandClient {
    repo_name: String,
    templates: CommandTemplates,
}

impl CommandClient {
    pub fn new(repo_name: impl Into<String>, templates: CommandTemplates) -> Self {
        Self {
            repo_name: repo_name.into(),
            templates,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.repo_name.clone(), config.commands.clone())
    }

    fn build(
        &self,
        op: &'static str,
        template: &[String],
        vars: &[(&str, &str)],
    ) -> Result<(String, Command), ClientError> {
        let (program, args) = template.split_first().ok_or(ClientError::Template(op))?;
        let mut command = Command::new(program);
        for arg in args {
            command.arg(substitute(arg, &self.repo_name, vars));
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok((program.clone(), command))
    }

    async fn run(
        &self,
        op: &'static str,
        template: &[String],
        vars: &[(&str, &str)],
    ) -> Result<Vec<u8>, ClientError> {
        let (program, mut command) = self.build(op, template, vars)?;
        tracing::debug!(op, program = %program, "running collaborator command");
        let output = command.output().await.map_err(|source| ClientError::Spawn {
            program: program.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(ClientError::CommandFailed {
                program,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Repository for CommandClient {
    async fn list_all_keys(&self) -> Result<Vec<Vec<u8>>, ClientError> {
        let stdout = self
            .run("list_keys", &self.templates.list_keys, &[])
            .await
            .map_err(|err| match err {
                ClientError::Template(_) => err,
                other => ClientError::Unavailable(other.to_string()),
            })?;
        Ok(parse_key_listing(&String::from_utf8_lossy(&stdout)))
    }

    async fn insert(&self, name: &str, content: &[u8], timestamp: u64) -> Result<(), ClientError> {
        let mut staged = tempfile::NamedTempFile::new()?;
        staged.write_all(content)?;
        staged.flush()?;
        let file = staged.path().display().to_string();
        let timestamp = timestamp.to_string();
        self.run(
            "insert",
            &self.templates.insert,
            &[("name", name), ("file", &file), ("timestamp", &timestamp)],
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), ClientError> {
        self.run("delete", &self.templates.delete, &[("name", name)])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ContentCache for CommandClient {
    async fn erase(&self, prefix: &str) -> Result<(), ClientError> {
        self.run("cache_erase", &self.templates.cache_erase, &[("name", prefix)])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PeerSync for CommandClient {
    async fn announce(&self, versioned_name: &str) -> Result<(), ClientError> {
        self.run("announce", &self.templates.announce, &[("name", versioned_name)])
            .await?;
        Ok(())
    }
}

fn substitute(arg: &str, repo: &str, vars: &[(&str, &str)]) -> String {
    let mut out = arg.replace("{repo}", repo);
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// One hex key per line; blank lines are ignored, undecodable ones logged and skipped.
pub(crate) fn parse_key_listing(listing: &str) -> Vec<Vec<u8>> {
    listing
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            match hex::decode(line) {
                Ok(key) => Some(key),
                Err(err) => {
                    tracing::warn!(line = idx + 1, error = %err, "skipping undecodable key");
                    None
                }
            }
        })
        .collect()
}
