pub mod config;
pub mod daemon;
pub mod send;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use standby_core::DaemonConfig;

/// Where to find the daemon: an explicit address, or the one in its config.
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Daemon configuration file [default: ~/.standby/standby.json].
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Command server address, overriding the configuration.
    #[arg(long)]
    pub addr: Option<String>,
}

impl ConnectArgs {
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => default_config_path(),
        }
    }

    pub fn load_config(&self) -> Result<DaemonConfig> {
        let path = self.config_path()?;
        DaemonConfig::load(&path)
            .with_context(|| format!("failed to load config {}", path.display()))
    }

    pub fn address(&self) -> Result<String> {
        match &self.addr {
            Some(addr) => Ok(addr.clone()),
            None => Ok(self.load_config()?.listen_addr()),
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    Ok(home.join(".standby").join("standby.json"))
}
