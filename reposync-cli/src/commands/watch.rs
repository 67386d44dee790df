//! `reposync watch`: run the daemon in the foreground.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use reposync_daemon::start_blocking;

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Directory to watch instead of the configured `watch_dir`.
    #[arg(long)]
    pub root: Option<PathBuf>,
}

impl WatchArgs {
    pub fn run(self) -> Result<()> {
        let (home, mut config) = super::load_config()?;
        if let Some(root) = self.root {
            config.watch_dir = root;
        }
        start_blocking(&home, config).context("daemon exited with error")
    }
}
