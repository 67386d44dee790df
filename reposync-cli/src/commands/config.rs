//! `reposync config`: show or initialise `~/.reposync/config.yaml`.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use reposync_core::{config, SyncConfig};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Write the default configuration file if none exists.
    #[arg(long)]
    pub write_default: bool,
}

impl ConfigArgs {
    pub fn run(self) -> Result<()> {
        if self.write_default {
            let home = super::home_dir()?;
            let path = config::config_path_at(&home);
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            let path = config::save_at(&home, &SyncConfig::default())
                .context("failed to write default configuration")?;
            eprintln!("{} {}", "wrote".green(), path.display());
        }

        let (_, config) = super::load_config()?;
        print!(
            "{}",
            serde_yaml::to_string(&config).context("failed to render configuration")?
        );
        Ok(())
    }
}
