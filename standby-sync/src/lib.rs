//! # standby-sync
//!
//! Backup-continuity pipeline: detect new execution reports, mirror the
//! backups they describe from the live node's share, resolve the
//! full/diff chain and hand the result to the external restore command.
//!
//! The daemon drives [`ScanState::scan`] on a schedule and feeds the new
//! files to [`ChainResolver::process_files`].

pub mod catalog;
pub mod chain;
pub mod error;
pub mod exec;
pub mod remote;
pub mod scan;

pub use chain::{ChainMemory, ChainResolver, ChainStats, FullSource, RestoreRecord};
pub use error::SyncError;
pub use exec::{CommandExecutor, ExecOutput, SystemExecutor};
pub use remote::{RemoteShare, RemoteSync, SyncOutcome};
pub use scan::{ScanEvent, ScanState};
