//! Daemon configuration.
//!
//! The file is a flat JSON object with camelCase keys. It is read into
//! [`RawConfig`] (every key optional) and validated into [`DaemonConfig`],
//! which applies defaults and floors and rejects missing mandatory keys.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{DatabaseName, InstanceName, MonitoredService};

pub const DEFAULT_INSTANCE: &str = "MSSQLSERVER";
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 7465;
pub const DEFAULT_LISTEN_INTERVAL: Duration = Duration::from_millis(100);
pub const MIN_LISTEN_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(5000);
pub const MIN_SCAN_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_FILE_FILTER: &str = "json";
pub const DEFAULT_RESTORE_PROGRAM: &str = "standby-restore";
pub const DEFAULT_RESTORE_HISTORY: usize = 50;

/// Configuration file as written on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConfig {
    pub monitored_service: Option<String>,
    pub local_dir: Option<PathBuf>,
    pub remote_share: Option<PathBuf>,
    pub instance: Option<String>,
    pub database: Option<String>,
    pub monitored_host: Option<String>,
    pub report_dir: Option<String>,
    pub file_filter: Option<String>,
    /// Milliseconds.
    pub scan_interval: Option<u64>,
    pub listen_address: Option<String>,
    pub port: Option<u16>,
    /// Milliseconds.
    pub listen_interval: Option<u64>,
    pub restore_command: Option<Vec<String>>,
    pub restore_history: Option<usize>,
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub ignore_signals: bool,
}

/// External restore invocation; backup paths are appended to `args`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Validated daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaemonConfig {
    /// File this configuration was loaded from, when loaded from disk.
    pub path: Option<PathBuf>,
    pub service: MonitoredService,
    pub monitored_host: Option<String>,
    pub local_dir: PathBuf,
    pub remote_share: PathBuf,
    /// Report tree in the live host's notation; empty means the share root.
    pub report_dir: String,
    pub file_filter: String,
    pub scan_interval: Duration,
    pub listen_address: String,
    pub port: u16,
    pub listen_interval: Duration,
    pub restore: RestoreCommand,
    pub restore_history: usize,
    pub log_file: Option<PathBuf>,
    pub ignore_signals: bool,
}

impl DaemonConfig {
    /// Load and validate the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: RawConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let mut config = Self::from_raw(parsed)?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Validate a raw configuration, applying defaults.
    pub fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let service_name =
            non_empty(raw.monitored_service).ok_or(ConfigError::MissingKey("monitoredService"))?;
        let local_dir = raw
            .local_dir
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::MissingKey("localDir"))?;
        let remote_share = raw
            .remote_share
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::MissingKey("remoteShare"))?;

        let instance = non_empty(raw.instance).unwrap_or_else(|| DEFAULT_INSTANCE.to_string());
        let database = non_empty(raw.database).unwrap_or_else(|| service_name.clone());

        let scan_interval = raw
            .scan_interval
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SCAN_INTERVAL)
            .max(MIN_SCAN_INTERVAL);
        let listen_interval = raw
            .listen_interval
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_LISTEN_INTERVAL)
            .max(MIN_LISTEN_INTERVAL);

        let restore = match raw.restore_command {
            Some(parts) => {
                let mut parts = parts.into_iter().filter(|p| !p.trim().is_empty());
                let program = parts.next().ok_or_else(|| ConfigError::Invalid {
                    key: "restoreCommand",
                    reason: "must name a program".to_string(),
                })?;
                RestoreCommand {
                    program,
                    args: parts.collect(),
                }
            }
            None => RestoreCommand {
                program: DEFAULT_RESTORE_PROGRAM.to_string(),
                args: Vec::new(),
            },
        };

        let restore_history = raw.restore_history.unwrap_or(DEFAULT_RESTORE_HISTORY);
        if restore_history == 0 {
            return Err(ConfigError::Invalid {
                key: "restoreHistory",
                reason: "must be at least 1".to_string(),
            });
        }

        let file_filter = non_empty(raw.file_filter)
            .map(|f| f.trim_start_matches("*.").trim_start_matches('.').to_string())
            .unwrap_or_else(|| DEFAULT_FILE_FILTER.to_string());

        Ok(Self {
            path: None,
            service: MonitoredService {
                name: service_name,
                instance: InstanceName(instance),
                database: DatabaseName(database),
            },
            monitored_host: non_empty(raw.monitored_host),
            local_dir,
            remote_share,
            report_dir: raw.report_dir.unwrap_or_default(),
            file_filter,
            scan_interval,
            listen_address: non_empty(raw.listen_address)
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.to_string()),
            port: raw.port.unwrap_or(DEFAULT_PORT),
            listen_interval,
            restore,
            restore_history,
            log_file: raw.log_file,
            ignore_signals: raw.ignore_signals,
        })
    }

    /// `address:port` the command server binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_address, self.port)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
