pub mod config;
pub mod daemon;
pub mod keys;
pub mod latest;
pub mod signal;
pub mod watch;

use std::path::PathBuf;

use anyhow::{Context, Result};

use reposync_core::config::{config_path_at, home, load_at};
use reposync_core::SyncConfig;

pub(crate) fn home_dir() -> Result<PathBuf> {
    home().context("could not determine home directory")
}

/// Home directory plus the configuration loaded from it.
pub(crate) fn load_config() -> Result<(PathBuf, SyncConfig)> {
    let home = home_dir()?;
    let config = load_at(&home)
        .with_context(|| format!("failed to load {}", config_path_at(&home).display()))?;
    Ok((home, config))
}
