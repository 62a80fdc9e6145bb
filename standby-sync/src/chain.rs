//! Backup chain resolution and restore triggering.
//!
//! A differential backup is only restorable on top of the full backup it
//! was taken against. For every new report the resolver mirrors the
//! backup locally and, for diffs, finds the full through three tiers tried
//! in order:
//!
//! 1. [`ChainMemory`]: the last full seen by this process;
//! 2. the local mirror directory, by file-naming convention;
//! 3. the live node's report tree, newest report first.
//!
//! A diff whose full cannot be found is never restored.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use standby_core::config::RestoreCommand;
use standby_core::{BackupMode, BackupReport, ChainKey, DaemonConfig, MonitoredService};

use crate::catalog;
use crate::error::SyncError;
use crate::exec::CommandExecutor;
use crate::remote::{RemoteShare, RemoteSync};

// ---------------------------------------------------------------------------
// Chain memory
// ---------------------------------------------------------------------------

/// Last known local path of the most recent full backup, per chain.
///
/// A cache only: it is empty after every restart.
#[derive(Debug, Clone, Default)]
pub struct ChainMemory {
    entries: HashMap<ChainKey, PathBuf>,
}

impl ChainMemory {
    pub fn get(&self, key: &ChainKey) -> Option<&Path> {
        self.entries.get(key).map(PathBuf::as_path)
    }

    pub fn remember(&mut self, key: ChainKey, path: PathBuf) {
        self.entries.insert(key, path);
    }

    pub fn forget(&mut self, key: &ChainKey) -> Option<PathBuf> {
        self.entries.remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by chain key.
    pub fn entries(&self) -> Vec<(&ChainKey, &Path)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(key, path)| (key, path.as_path()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Where the full backup of a restore came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FullSource {
    /// The report itself was a full backup.
    Report,
    Memory,
    LocalSearch,
    RemoteScan,
}

/// One restore invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreRecord {
    pub at: DateTime<Utc>,
    pub report: PathBuf,
    pub mode: BackupMode,
    pub full: PathBuf,
    pub diff: Option<PathBuf>,
    pub full_source: FullSource,
    pub exit_code: Option<i32>,
    pub success: bool,
    /// Set when the restore program could not be started.
    pub error: Option<String>,
}

/// Counters exposed through the `stats` command.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChainStats {
    /// Report files handed to the resolver.
    pub count: u64,
    /// Reports that are not backups of the monitored service.
    pub ignored: u64,
    /// Reports dropped: unreadable, unsyncable, or without a resolvable full.
    pub skipped: u64,
    pub restores: u64,
    pub failed_restores: u64,
    pub last_restore: Option<RestoreRecord>,
    /// Most recent restores, oldest first.
    pub history: VecDeque<RestoreRecord>,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Turns new execution reports into restores.
pub struct ChainResolver {
    service: MonitoredService,
    remote: RemoteSync,
    report_root: PathBuf,
    extension: String,
    restore: RestoreCommand,
    executor: Box<dyn CommandExecutor>,
    memory: ChainMemory,
    stats: ChainStats,
    history_limit: usize,
    last_host: Option<String>,
}

impl ChainResolver {
    pub fn new(config: &DaemonConfig, executor: Box<dyn CommandExecutor>) -> Result<Self, SyncError> {
        let share = RemoteShare::new(&config.remote_share);
        let report_root = share.resolve(&config.report_dir)?;
        Ok(Self {
            service: config.service.clone(),
            remote: RemoteSync::new(share, &config.local_dir),
            report_root,
            extension: config.file_filter.clone(),
            restore: config.restore.clone(),
            executor,
            memory: ChainMemory::default(),
            stats: ChainStats::default(),
            history_limit: config.restore_history.max(1),
            last_host: config.monitored_host.clone(),
        })
    }

    pub fn service(&self) -> &MonitoredService {
        &self.service
    }

    /// Locally reachable root of the live node's report tree.
    pub fn report_root(&self) -> &Path {
        &self.report_root
    }

    pub fn remote(&self) -> &RemoteSync {
        &self.remote
    }

    pub fn memory(&self) -> &ChainMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut ChainMemory {
        &mut self.memory
    }

    pub fn stats(&self) -> &ChainStats {
        &self.stats
    }

    /// Configured host, else the host of the last report seen.
    pub fn monitored_host(&self) -> Option<&str> {
        self.last_host.as_deref()
    }

    /// Parse new report files and process the backups they describe.
    pub fn process_files(&mut self, files: &[PathBuf]) {
        let mut reports = Vec::with_capacity(files.len());
        for file in files {
            self.stats.count += 1;
            match BackupReport::load(file) {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {
                    tracing::debug!("ignoring non-backup report {}", file.display());
                    self.stats.ignored += 1;
                }
                Err(err) => {
                    tracing::warn!("skipping malformed report: {}", err);
                    self.stats.skipped += 1;
                }
            }
        }
        self.on_new_reports(reports);
    }

    /// Process parsed backup reports, oldest execution first.
    pub fn on_new_reports(&mut self, mut reports: Vec<BackupReport>) {
        reports.sort_by(|a, b| {
            (a.started_at.or(a.ended_at), &a.source).cmp(&(b.started_at.or(b.ended_at), &b.source))
        });
        for report in &reports {
            self.handle(report);
        }
    }

    fn handle(&mut self, report: &BackupReport) {
        if !self.service.matches(&report.instance, &report.database) {
            tracing::debug!(
                "ignoring report for {} ({} monitored)",
                report.chain_key(),
                self.service.chain_key()
            );
            self.stats.ignored += 1;
            return;
        }
        if !report.host.is_empty() && self.last_host.is_none() {
            self.last_host = Some(report.host.clone());
        }

        tracing::info!(
            "new {} backup for {} from {}",
            report.mode,
            report.chain_key(),
            report.source.display()
        );

        let Ok(synced) = self.remote.sync(&report.output) else {
            self.stats.skipped += 1;
            return;
        };
        let local = synced.into_path();

        match report.mode {
            BackupMode::Full => {
                self.memory.remember(self.service.chain_key(), local.clone());
                self.run_restore(report, local, FullSource::Report, None);
            }
            BackupMode::Diff => match self.resolve_full(report) {
                Some((full, source)) => self.run_restore(report, full, source, Some(local)),
                None => {
                    tracing::warn!(
                        "no full backup found for diff {}; not restoring {}",
                        report.chain_key(),
                        local.display()
                    );
                    self.stats.skipped += 1;
                }
            },
        }
    }

    /// Find the full backup a diff depends on, first success wins.
    fn resolve_full(&mut self, report: &BackupReport) -> Option<(PathBuf, FullSource)> {
        let key = self.service.chain_key();

        if let Some(path) = self.memory.get(&key) {
            if path.is_file() {
                return Some((path.to_path_buf(), FullSource::Memory));
            }
            tracing::info!("remembered full {} is gone; searching", path.display());
            self.memory.forget(&key);
        }

        if let Some(path) =
            catalog::find_latest_local_full(self.remote.local_dir(), &report.host, &key)
        {
            tracing::info!("found local full {} for {}", path.display(), key);
            self.memory.remember(key, path.clone());
            return Some((path, FullSource::LocalSearch));
        }

        let full_report = catalog::find_latest_remote_full(&self.report_root, &self.extension, &key)?;
        tracing::info!(
            "found remote full report {} for {}",
            full_report.source.display(),
            key
        );
        let path = self.remote.sync(&full_report.output).ok()?.into_path();
        self.memory.remember(key, path.clone());
        Some((path, FullSource::RemoteScan))
    }

    fn run_restore(
        &mut self,
        report: &BackupReport,
        full: PathBuf,
        full_source: FullSource,
        diff: Option<PathBuf>,
    ) {
        let mut args = self.restore.args.clone();
        args.push(full.display().to_string());
        if let Some(diff) = &diff {
            args.push(diff.display().to_string());
        }

        tracing::info!("restoring: {} {}", self.restore.program, args.join(" "));
        let (exit_code, error) = match self.executor.run(&self.restore.program, &args) {
            Ok(output) => {
                if output.success() {
                    tracing::info!("restore of {} succeeded", report.chain_key());
                } else {
                    tracing::warn!(
                        "restore of {} exited with {:?}: {}",
                        report.chain_key(),
                        output.code,
                        output.stderr.trim()
                    );
                }
                (output.code, None)
            }
            Err(err) => {
                tracing::error!("cannot start restore program {}: {}", self.restore.program, err);
                (None, Some(err.to_string()))
            }
        };

        let success = exit_code == Some(0);
        let record = RestoreRecord {
            at: Utc::now(),
            report: report.source.clone(),
            mode: report.mode,
            full,
            diff,
            full_source,
            exit_code,
            success,
            error,
        };

        self.stats.restores += 1;
        if !success {
            self.stats.failed_restores += 1;
        }
        self.stats.history.push_back(record.clone());
        while self.stats.history.len() > self.history_limit {
            self.stats.history.pop_front();
        }
        self.stats.last_restore = Some(record);
    }
}
