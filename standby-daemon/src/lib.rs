//! Standby daemon runtime: command server + cooperative scheduler + backup
//! monitor job, all on one thread.

mod error;
pub mod log_rotation;
pub mod monitor;
pub mod protocol;
mod runtime;
pub mod scheduler;
pub mod server;

pub use error::DaemonError;
pub use monitor::BackupMonitor;
pub use protocol::{
    request_stats, request_status, request_terminate, send_command, CommandRequest,
};
pub use runtime::{
    run, start_blocking, BusClient, CommandHandler, Daemon, DaemonInfo, DisconnectHook, InfoHook,
};
pub use scheduler::Scheduler;
