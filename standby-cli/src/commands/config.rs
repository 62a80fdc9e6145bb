//! `standby config`: validate a configuration file without starting.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use super::ConnectArgs;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Load and validate the configuration; print it with defaults applied.
    Check {
        #[command(flatten)]
        connect: ConnectArgs,
    },
}

pub fn run(command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Check { connect } => {
            let config = connect.load_config()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&config).context("failed to render config")?
            );
            if !config.remote_share.is_dir() {
                eprintln!(
                    "{} remote share {} is not reachable",
                    "warning:".yellow().bold(),
                    config.remote_share.display()
                );
            }
            println!("{}", "configuration OK".green());
        }
    }
    Ok(())
}
