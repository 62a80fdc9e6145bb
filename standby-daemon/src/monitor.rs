//! The backup monitor job: scans the live node's report tree and feeds new
//! reports to the chain resolver.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use standby_core::DaemonConfig;
use standby_sync::{ChainResolver, ScanEvent, ScanState};

use crate::error::DaemonError;
use crate::protocol::CommandRequest;
use crate::runtime::Daemon;

pub const MONITOR_JOB: &str = "backup-monitor";

pub struct BackupMonitor {
    scan: ScanState,
    roots: Vec<PathBuf>,
    resolver: ChainResolver,
    interval: Duration,
    remote_share: PathBuf,
    cycles: u64,
}

impl BackupMonitor {
    pub fn new(config: &DaemonConfig, resolver: ChainResolver) -> Self {
        Self {
            scan: ScanState::new(config.file_filter.clone()),
            roots: vec![resolver.report_root().to_path_buf()],
            resolver,
            interval: config.scan_interval,
            remote_share: config.remote_share.clone(),
            cycles: 0,
        }
    }

    pub fn resolver(&self) -> &ChainResolver {
        &self.resolver
    }

    /// One scan of the report tree; new reports are processed immediately.
    pub fn run_cycle(&mut self) -> ScanEvent {
        self.cycles += 1;
        let event = self.scan.scan(&self.roots);
        match &event {
            ScanEvent::New(files) => {
                tracing::info!(count = files.len(), "new execution reports");
                self.resolver.process_files(files);
            }
            ScanEvent::Reset | ScanEvent::NoChange => {}
        }
        event
    }

    pub fn status_fields(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(
            "monitored_service".to_string(),
            json!(self.resolver.service().name),
        );
        map.insert(
            "monitored_host".to_string(),
            json!(self.resolver.monitored_host()),
        );
        map.insert(
            "monitored_share".to_string(),
            json!(self.remote_share.display().to_string()),
        );
        map.insert(
            "local_dir".to_string(),
            json!(self.resolver.remote().local_dir().display().to_string()),
        );
        map.insert("scan_cycles".to_string(), json!(self.cycles));
        map.insert("known_reports".to_string(), json!(self.scan.known()));
        map
    }

    pub fn stats_fields(&self) -> Map<String, Value> {
        match serde_json::to_value(self.resolver.stats()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Reply body for `chain`: remembered fulls keyed by `instance/database`.
    pub fn chain_reply(&self) -> String {
        let chains: Map<String, Value> = self
            .resolver
            .memory()
            .entries()
            .into_iter()
            .map(|(key, path)| (key.to_string(), json!(path.display().to_string())))
            .collect();
        serde_json::to_string_pretty(&Value::Object(chains)).unwrap_or_default()
    }

    /// Declare the scan job and its commands on `daemon`.
    pub fn register(self, daemon: &mut Daemon) -> Result<Rc<RefCell<Self>>, DaemonError> {
        let interval = self.interval;
        let monitor = Rc::new(RefCell::new(self));

        let job = Rc::clone(&monitor);
        daemon.declare(MONITOR_JOB, interval, move || {
            job.borrow_mut().run_cycle();
            Ok(())
        });

        let status = Rc::clone(&monitor);
        daemon.on_status(move || status.borrow().status_fields());
        let stats = Rc::clone(&monitor);
        daemon.on_stats(move || stats.borrow().stats_fields());

        let chain = Rc::clone(&monitor);
        daemon.register_command("chain", move |_: &CommandRequest| chain.borrow().chain_reply())?;

        let rescan = Rc::clone(&monitor);
        daemon.register_command("rescan", move |_: &CommandRequest| {
            match rescan.borrow_mut().run_cycle() {
                ScanEvent::New(files) => format!("{} new report(s)", files.len()),
                ScanEvent::NoChange => "no change".to_string(),
                ScanEvent::Reset => "reset".to_string(),
            }
        })?;

        let forget = Rc::clone(&monitor);
        daemon.register_command("forget", move |_: &CommandRequest| {
            let mut monitor = forget.borrow_mut();
            let count = monitor.resolver.memory().len();
            monitor.resolver.memory_mut().clear();
            tracing::info!(count, "chain memory cleared");
            format!("forgot {count} chain(s)")
        })?;

        Ok(monitor)
    }
}
