//! Standby core library: domain types, execution reports, daemon config.
//!
//! - [`types`]: newtypes and the monitored-service identity
//! - [`report`]: execution-report parsing into [`BackupReport`]
//! - [`config`]: [`DaemonConfig`] loading and validation
//! - [`error`]: [`ConfigError`], [`ReportError`]

pub mod config;
pub mod error;
pub mod report;
pub mod types;

pub use config::DaemonConfig;
pub use error::{ConfigError, ReportError};
pub use report::{BackupMode, BackupReport, ExecutionReport};
pub use types::{ChainKey, DatabaseName, InstanceName, MonitoredService};
