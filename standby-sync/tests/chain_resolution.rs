//! Chain resolution against a simulated live-node share.

use std::cell::RefCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde_json::json;
use tempfile::TempDir;

use standby_core::config::RawConfig;
use standby_core::{BackupMode, DaemonConfig};
use standby_sync::{ChainResolver, CommandExecutor, ExecOutput, FullSource};

type Calls = Rc<RefCell<Vec<Vec<String>>>>;

struct FakeExecutor {
    calls: Calls,
    code: i32,
}

impl CommandExecutor for FakeExecutor {
    fn run(&self, program: &str, args: &[String]) -> io::Result<ExecOutput> {
        let mut call = vec![program.to_string()];
        call.extend(args.iter().cloned());
        self.calls.borrow_mut().push(call);
        Ok(ExecOutput {
            code: Some(self.code),
            stdout: String::new(),
            stderr: if self.code == 0 { String::new() } else { "restore failed".to_string() },
        })
    }
}

/// A live node's share mounted locally, plus the standby's local directory.
struct LiveNode {
    share: TempDir,
    local: TempDir,
}

impl LiveNode {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let node = Self {
            share: TempDir::new().expect("share"),
            local: TempDir::new().expect("local"),
        };
        fs::create_dir_all(node.share.path().join("Backups")).expect("backups dir");
        fs::create_dir_all(node.share.path().join("Reports")).expect("reports dir");
        node
    }

    fn config(&self, history: usize) -> DaemonConfig {
        let raw: RawConfig = serde_json::from_value(json!({
            "monitoredService": "Canal33",
            "instance": "MSSQLSERVER",
            "localDir": self.local.path(),
            "remoteShare": self.share.path(),
            "reportDir": "D:\\Reports",
            "restoreCommand": ["restore-db", "--replace"],
            "restoreHistory": history
        }))
        .expect("raw config");
        DaemonConfig::from_raw(raw).expect("config")
    }

    fn resolver(&self, calls: &Calls) -> ChainResolver {
        self.resolver_with(calls, 0, 50)
    }

    fn resolver_with(&self, calls: &Calls, code: i32, history: usize) -> ChainResolver {
        ChainResolver::new(
            &self.config(history),
            Box::new(FakeExecutor {
                calls: calls.clone(),
                code,
            }),
        )
        .expect("resolver")
    }

    /// Drop a backup file on the share; returns its path in live-host notation.
    fn backup(&self, name: &str) -> String {
        fs::write(self.share.path().join("Backups").join(name), name.as_bytes())
            .expect("write backup");
        format!("D:\\Backups\\{name}")
    }

    /// Drop an execution report; returns its reachable path.
    fn report(&self, file: &str, database: &str, mode: &str, output: &str, started: &str) -> PathBuf {
        let path = self.share.path().join("Reports").join(file);
        let body = json!({
            "command": "mssql",
            "verb": "backup",
            "host": "live01",
            "instance": "MSSQLSERVER",
            "database": database,
            "mode": mode,
            "output": output,
            "dummy": false,
            "startedAt": started
        });
        fs::write(&path, body.to_string()).expect("write report");
        path
    }

    fn local(&self, name: &str) -> PathBuf {
        self.local.path().join(name)
    }
}

const FULL_T0: &str = "live01-MSSQLSERVER-Canal33-260101-020000-full.backup";
const DIFF_T1: &str = "live01-MSSQLSERVER-Canal33-260101-080000-diff.backup";
const DIFF_T2: &str = "live01-MSSQLSERVER-Canal33-260101-140000-diff.backup";

fn call(program_args: &[&str], paths: &[&Path]) -> Vec<String> {
    let mut call: Vec<String> = program_args.iter().map(|s| s.to_string()).collect();
    call.extend(paths.iter().map(|p| p.display().to_string()));
    call
}

#[test]
fn full_report_restores_alone_and_is_remembered() {
    let node = LiveNode::new();
    let calls = Calls::default();
    let mut resolver = node.resolver(&calls);

    let output = node.backup(FULL_T0);
    let report = node.report("r1.json", "Canal33", "full", &output, "2026-01-01T02:00:00Z");
    resolver.process_files(&[report]);

    assert_eq!(
        *calls.borrow(),
        vec![call(&["restore-db", "--replace"], &[&node.local(FULL_T0)])]
    );
    let key = resolver.service().chain_key();
    assert_eq!(resolver.memory().get(&key), Some(node.local(FULL_T0).as_path()));
    assert_eq!(resolver.stats().restores, 1);
    let last = resolver.stats().last_restore.as_ref().expect("last restore");
    assert_eq!(last.full_source, FullSource::Report);
    assert_eq!(last.mode, BackupMode::Full);
    assert!(last.success);
    assert_eq!(resolver.monitored_host(), Some("live01"));
}

#[test]
fn end_to_end_memory_then_local_search_after_restart() {
    let node = LiveNode::new();
    let calls = Calls::default();

    let mut resolver = node.resolver(&calls);
    let full = node.backup(FULL_T0);
    let r0 = node.report("r0.json", "Canal33", "full", &full, "2026-01-01T02:00:00Z");
    resolver.process_files(&[r0]);

    let diff1 = node.backup(DIFF_T1);
    let r1 = node.report("r1.json", "Canal33", "diff", &diff1, "2026-01-01T08:00:00Z");
    resolver.process_files(&[r1]);
    assert_eq!(
        resolver.stats().last_restore.as_ref().map(|r| r.full_source),
        Some(FullSource::Memory)
    );

    // Simulated restart: a fresh resolver with empty memory.
    let mut restarted = node.resolver(&calls);
    assert!(restarted.memory().is_empty());
    let diff2 = node.backup(DIFF_T2);
    let r2 = node.report("r2.json", "Canal33", "diff", &diff2, "2026-01-01T14:00:00Z");
    restarted.process_files(&[r2]);

    let prefix = ["restore-db", "--replace"];
    assert_eq!(
        *calls.borrow(),
        vec![
            call(&prefix, &[&node.local(FULL_T0)]),
            call(&prefix, &[&node.local(FULL_T0), &node.local(DIFF_T1)]),
            call(&prefix, &[&node.local(FULL_T0), &node.local(DIFF_T2)]),
        ]
    );
    assert_eq!(
        restarted.stats().last_restore.as_ref().map(|r| r.full_source),
        Some(FullSource::LocalSearch)
    );
    let key = restarted.service().chain_key();
    assert_eq!(restarted.memory().get(&key), Some(node.local(FULL_T0).as_path()));
}

#[test]
fn remote_scan_is_used_when_memory_and_local_search_miss() {
    let node = LiveNode::new();
    let calls = Calls::default();
    let mut resolver = node.resolver(&calls);

    // The full was reported before this daemon ever ran; only its report
    // on the share knows where it is.
    let full = node.backup(FULL_T0);
    node.report("r0.json", "Canal33", "full", &full, "2026-01-01T02:00:00Z");

    let diff = node.backup(DIFF_T1);
    let r1 = node.report("r1.json", "Canal33", "diff", &diff, "2026-01-01T08:00:00Z");
    resolver.process_files(&[r1]);

    assert_eq!(
        *calls.borrow(),
        vec![call(
            &["restore-db", "--replace"],
            &[&node.local(FULL_T0), &node.local(DIFF_T1)]
        )]
    );
    let key = resolver.service().chain_key();
    assert_eq!(resolver.memory().get(&key), Some(node.local(FULL_T0).as_path()));
    assert_eq!(
        resolver.stats().last_restore.as_ref().map(|r| r.full_source),
        Some(FullSource::RemoteScan)
    );
}

#[test]
fn diff_without_any_full_is_never_restored() {
    let node = LiveNode::new();
    let calls = Calls::default();
    let mut resolver = node.resolver(&calls);

    let diff = node.backup(DIFF_T1);
    let r1 = node.report("r1.json", "Canal33", "diff", &diff, "2026-01-01T08:00:00Z");
    resolver.process_files(&[r1]);

    assert!(calls.borrow().is_empty(), "orphan diff must not be restored");
    assert_eq!(resolver.stats().skipped, 1);
    assert_eq!(resolver.stats().restores, 0);
    assert!(resolver.memory().is_empty());
}

#[test]
fn stale_memory_entry_falls_through_to_local_search() {
    let node = LiveNode::new();
    let calls = Calls::default();
    let mut resolver = node.resolver(&calls);

    let key = resolver.service().chain_key();
    resolver
        .memory_mut()
        .remember(key.clone(), node.local("purged-full.backup"));
    fs::write(node.local(FULL_T0), b"full").expect("local full");

    let diff = node.backup(DIFF_T1);
    let r1 = node.report("r1.json", "Canal33", "diff", &diff, "2026-01-01T08:00:00Z");
    resolver.process_files(&[r1]);

    assert_eq!(calls.borrow().len(), 1);
    assert_eq!(resolver.memory().get(&key), Some(node.local(FULL_T0).as_path()));
}

#[test]
fn other_database_and_dummy_reports_are_ignored() {
    let node = LiveNode::new();
    let calls = Calls::default();
    let mut resolver = node.resolver(&calls);

    let other = node.backup("live01-MSSQLSERVER-Canal34-260101-020000-full.backup");
    let r_other = node.report("other.json", "Canal34", "full", &other, "2026-01-01T02:00:00Z");
    let dummy = node.share.path().join("Reports").join("dummy.json");
    fs::write(
        &dummy,
        json!({ "verb": "backup", "instance": "MSSQLSERVER", "database": "Canal33",
                "mode": "full", "output": "D:\\x.backup", "dummy": true })
        .to_string(),
    )
    .expect("write dummy");
    let broken = node.share.path().join("Reports").join("broken.json");
    fs::write(&broken, "{ truncated").expect("write broken");

    resolver.process_files(&[r_other, dummy, broken]);

    assert!(calls.borrow().is_empty());
    let stats = resolver.stats();
    assert_eq!(stats.count, 3);
    assert_eq!(stats.ignored, 2);
    assert_eq!(stats.skipped, 1);
}

#[test]
fn full_and_diff_in_one_cycle_are_processed_in_execution_order() {
    let node = LiveNode::new();
    let calls = Calls::default();
    let mut resolver = node.resolver(&calls);

    let full = node.backup(FULL_T0);
    let diff = node.backup(DIFF_T1);
    // File names sort the diff first; execution times do not.
    let r_diff = node.report("a.json", "Canal33", "diff", &diff, "2026-01-01T08:00:00Z");
    let r_full = node.report("b.json", "Canal33", "full", &full, "2026-01-01T02:00:00Z");
    resolver.process_files(&[r_diff, r_full]);

    let calls = calls.borrow();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].len(), 3, "full restored first, alone");
    assert_eq!(calls[1].len(), 4, "diff restored with its full");
}

#[test]
fn failed_restores_are_counted_and_history_is_bounded() {
    let node = LiveNode::new();
    let calls = Calls::default();
    let mut resolver = node.resolver_with(&calls, 1, 2);

    for (i, hour) in ["02", "03", "04"].iter().enumerate() {
        let name = format!("live01-MSSQLSERVER-Canal33-260101-{hour}0000-full.backup");
        let output = node.backup(&name);
        let report = node.report(
            &format!("r{i}.json"),
            "Canal33",
            "full",
            &output,
            &format!("2026-01-01T{hour}:00:00Z"),
        );
        resolver.process_files(&[report]);
    }

    let stats = resolver.stats();
    assert_eq!(stats.restores, 3);
    assert_eq!(stats.failed_restores, 3);
    assert_eq!(stats.history.len(), 2);
    assert_eq!(
        stats.last_restore.as_ref().and_then(|r| r.exit_code),
        Some(1)
    );
}

#[test]
fn unsyncable_backup_is_skipped() {
    let node = LiveNode::new();
    let calls = Calls::default();
    let mut resolver = node.resolver(&calls);

    let report = node.report(
        "r.json",
        "Canal33",
        "full",
        "D:\\Backups\\never-written.backup",
        "2026-01-01T02:00:00Z",
    );
    resolver.process_files(&[report]);

    assert!(calls.borrow().is_empty());
    assert_eq!(resolver.stats().skipped, 1);
}

#[test]
fn differently_cased_reports_share_one_chain() {
    let node = LiveNode::new();
    let calls = Calls::default();
    let mut resolver = node.resolver(&calls);

    let full = node.backup(FULL_T0);
    let r0 = node.report("r0.json", "CANAL33", "full", &full, "2026-01-01T02:00:00Z");
    resolver.process_files(&[r0]);
    assert_eq!(resolver.memory().len(), 1);

    let diff = node.backup(DIFF_T1);
    let r1 = node.report("r1.json", "Canal33", "diff", &diff, "2026-01-01T08:00:00Z");
    resolver.process_files(&[r1]);

    assert_eq!(
        resolver.stats().last_restore.as_ref().map(|r| r.full_source),
        Some(FullSource::Memory)
    );
    assert_eq!(resolver.memory().len(), 1);
}
