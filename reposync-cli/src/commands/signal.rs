//! `reposync lock` / `reposync unlock`: fetch-side signaling.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use reposync_daemon::signal::resolve_path;
use reposync_daemon::{send_signal, SignalMessage};

#[derive(Args, Debug)]
pub struct SignalArgs {
    /// File the fetch writes.
    pub path: PathBuf,
}

impl SignalArgs {
    pub fn lock(self) -> Result<()> {
        let path = resolve_path(&self.path);
        send(SignalMessage::Lock(path))
    }

    pub fn unlock(self) -> Result<()> {
        let path = resolve_path(&self.path);
        send(SignalMessage::Unlock(path))
    }
}

fn send(message: SignalMessage) -> Result<()> {
    let (_, config) = super::load_config()?;
    send_signal(&config.signal_socket, &message).with_context(|| {
        format!(
            "failed to signal daemon at {}",
            config.signal_socket.display()
        )
    })?;
    println!("{} {message}", "sent".green());
    Ok(())
}
