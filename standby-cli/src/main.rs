//! Standby: keeps a backup node restored from the live node's backups.
//!
//! # Usage
//!
//! ```text
//! standby daemon start|status|stats|stop|logs [--config <file>] [--addr <host:port>]
//! standby send <command> [args...]
//! standby config check [--config <file>]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config::ConfigCommand, daemon::DaemonCommand, send::SendArgs};

#[derive(Parser, Debug)]
#[command(
    name = "standby",
    version,
    about = "Restore backups taken on a live database node onto a standby node",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run or query the standby daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Send a raw command line to a running daemon.
    Send(SendArgs),

    /// Inspect the daemon configuration file.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Send(args) => args.run(),
        Commands::Config { command } => commands::config::run(command),
    }
}
