//! `reposync keys`: dump the repository's raw key table.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use reposync_core::name::decode_rendered;
use reposync_core::{CommandClient, Repository};

#[derive(Args, Debug)]
pub struct KeysArgs {
    /// Only show keys whose rendered name starts with this prefix.
    #[arg(long)]
    pub prefix: Option<String>,
}

impl KeysArgs {
    pub fn run(self) -> Result<()> {
        let (_, config) = super::load_config()?;
        let repo = Arc::new(CommandClient::from_config(&config));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        let keys = runtime
            .block_on(repo.list_all_keys())
            .context("repository unavailable")?;

        for key in keys {
            let raw = hex::encode_upper(&key);
            match decode_rendered(&key, &config.name_types) {
                Ok(name) => {
                    if self.prefix.as_deref().is_some_and(|p| !name.uri.starts_with(p)) {
                        continue;
                    }
                    println!("{raw}  {}", name.uri);
                }
                // Malformed keys are shown unless a prefix filter is active.
                Err(err) if self.prefix.is_none() => {
                    println!("{raw}  {} {err}", "malformed:".red());
                }
                Err(_) => {}
            }
        }
        Ok(())
    }
}
