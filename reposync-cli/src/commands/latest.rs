//! `reposync latest`: one-shot latest-version lookup.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use reposync_core::{CommandClient, VersionResolver};

#[derive(Args, Debug)]
pub struct LatestArgs {
    /// Name prefix, e.g. `/docs/readme.md/`.
    pub prefix: String,
}

impl LatestArgs {
    pub fn run(self) -> Result<()> {
        let (_, config) = super::load_config()?;
        let resolver = VersionResolver::new(
            Arc::new(CommandClient::from_config(&config)),
            config.name_types,
        );

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        let latest = runtime
            .block_on(resolver.try_latest_version(&self.prefix))
            .context("repository unavailable")?;

        match latest {
            Some(name) => println!("{name}"),
            None => eprintln!(
                "{} no versioned name under {}",
                "note:".yellow().bold(),
                self.prefix
            ),
        }
        Ok(())
    }
}
