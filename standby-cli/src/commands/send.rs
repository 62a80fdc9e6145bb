//! `standby send`: raw command line to a running daemon.

use anyhow::{Context, Result};
use clap::Args;

use standby_daemon::protocol::reply_into_text;
use standby_daemon::send_command;

use super::ConnectArgs;

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Command name, e.g. `status`, `chain`, `rescan`.
    pub command: String,

    /// Arguments passed to the command.
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,
}

impl SendArgs {
    pub fn run(self) -> Result<()> {
        let addr = self.connect.address()?;
        let mut line = self.command;
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }

        let reply = send_command(&addr, &line)
            .with_context(|| format!("failed to send '{line}' to {addr}"))?;
        let text = reply_into_text(reply).context("daemon rejected the command")?;
        print!("{text}");
        Ok(())
    }
}
