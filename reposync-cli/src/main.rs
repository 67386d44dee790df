//! Reposync: mirror a local tree into a versioned content repository.
//!
//! # Usage
//!
//! ```text
//! reposync watch [--root <dir>]
//! reposync latest <prefix>
//! reposync keys [--prefix <prefix>]
//! reposync lock <path>
//! reposync unlock <path>
//! reposync daemon status|stop
//! reposync config [--write-default]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    config::ConfigArgs, daemon::DaemonCommand, keys::KeysArgs, latest::LatestArgs, signal::SignalArgs,
    watch::WatchArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "reposync",
    version,
    about = "Publish local file edits to a versioned content repository",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the tree and publish every stabilized edit (foreground).
    Watch(WatchArgs),

    /// Print the latest versioned name under a prefix.
    Latest(LatestArgs),

    /// List every repository key as hex next to its rendered name.
    Keys(KeysArgs),

    /// Tell the daemon a fetch is about to write this file.
    Lock(SignalArgs),

    /// Tell the daemon a fetch finished writing this file.
    Unlock(SignalArgs),

    /// Query or stop a running daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Print the effective configuration.
    Config(ConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Watch(args) => args.run(),
        Commands::Latest(args) => args.run(),
        Commands::Keys(args) => args.run(),
        Commands::Lock(args) => args.lock(),
        Commands::Unlock(args) => args.unlock(),
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Config(args) => args.run(),
    }
}
