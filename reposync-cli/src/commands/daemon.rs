//! `reposync daemon`: control socket client.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use reposync_daemon::{request_status, request_stop, DaemonError};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Query daemon runtime status over the control socket.
    Status,
    /// Request graceful daemon shutdown.
    Stop,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = super::home_dir()?;

    match command {
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("{}", "daemon stop requested".green()),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("{}", "daemon is not running".yellow());
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(status) => println!(
                "{}",
                serde_json::to_string_pretty(&status)
                    .context("failed to render daemon status JSON")?
            ),
            Err(DaemonError::DaemonNotRunning { socket }) => {
                println!(
                    "{} (no socket at {})",
                    "daemon is not running".yellow(),
                    socket.display()
                );
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
    }

    Ok(())
}
