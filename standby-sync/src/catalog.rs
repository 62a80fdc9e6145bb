//! Lookups for the most recent full backup of a chain.
//!
//! Two sources back the chain resolver once its in-memory cache misses:
//! the local mirror directory, searched by file-naming convention, and the
//! live node's report tree, scanned newest first.

use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use standby_core::{BackupMode, BackupReport, ChainKey};

use crate::scan::collect_matching;

/// Suffix of full backups mirrored locally.
pub const FULL_BACKUP_SUFFIX: &str = "-full.backup";

/// File name of a full backup under the naming convention
/// `host-instance-database-<yymmdd>-<hhmmss>-full.backup`.
pub fn full_backup_name(host: &str, key: &ChainKey, date: &str, time: &str) -> String {
    format!(
        "{host}-{}-{}-{date}-{time}{FULL_BACKUP_SUFFIX}",
        key.instance, key.database
    )
}

/// If `file_name` follows the full-backup convention for `host` and `key`,
/// return its `<6 digits>-<6 digits>` stamp.
///
/// An empty `host` accepts any host prefix.
pub fn full_backup_stamp<'a>(file_name: &'a str, host: &str, key: &ChainKey) -> Option<&'a str> {
    let stem = file_name.strip_suffix(FULL_BACKUP_SUFFIX)?;
    // "-dddddd-dddddd"
    if stem.len() < 14 || !stem.is_char_boundary(stem.len() - 14) {
        return None;
    }
    let (prefix, stamp_with_dash) = stem.split_at(stem.len() - 14);
    let stamp = stamp_with_dash.strip_prefix('-')?;
    if !is_stamp(stamp) {
        return None;
    }

    let chain = format!("{}-{}", key.instance, key.database);
    let matches = if host.is_empty() {
        prefix.len() > chain.len() + 1
            && prefix.is_char_boundary(prefix.len() - chain.len() - 1)
            && prefix[prefix.len() - chain.len() - 1..]
                .eq_ignore_ascii_case(&format!("-{chain}"))
    } else {
        prefix.eq_ignore_ascii_case(&format!("{host}-{chain}"))
    };
    matches.then_some(stamp)
}

fn is_stamp(stamp: &str) -> bool {
    let bytes = stamp.as_bytes();
    bytes.len() == 13
        && bytes[6] == b'-'
        && bytes[..6].iter().all(u8::is_ascii_digit)
        && bytes[7..].iter().all(u8::is_ascii_digit)
}

/// Most recent full backup for `key` already present in `dir`.
///
/// Names embed a sortable date/time stamp, so the greatest stamp wins.
pub fn find_latest_local_full(dir: &Path, host: &str, key: &ChainKey) -> Option<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!("cannot search {} for full backups: {}", dir.display(), err);
            return None;
        }
    };

    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| {
            let name = e.file_name().to_str()?.to_string();
            let stamp = full_backup_stamp(&name, host, key)?.to_string();
            Some((stamp, name, e.path()))
        })
        .max_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)))
        .map(|(_, _, path)| path)
}

/// Most recent non-dummy full backup report for `key` under `report_root`.
///
/// Reports are visited newest first (modification time, then name) and the
/// walk stops at the first match. Unreadable reports are skipped.
pub fn find_latest_remote_full(
    report_root: &Path,
    extension: &str,
    key: &ChainKey,
) -> Option<BackupReport> {
    let mut files = BTreeSet::new();
    collect_matching(report_root, extension, &mut files);

    let mut ordered: Vec<(SystemTime, PathBuf)> = files
        .into_iter()
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .collect();
    ordered.sort_by_key(|(modified, path)| Reverse((*modified, path.clone())));

    for (_, path) in ordered {
        let report = match BackupReport::load(&path) {
            Ok(Some(report)) => report,
            Ok(None) => continue,
            Err(err) => {
                tracing::debug!("skipping unreadable report: {}", err);
                continue;
            }
        };
        if report.mode == BackupMode::Full && same_chain(&report.chain_key(), key) {
            return Some(report);
        }
    }
    None
}

fn same_chain(a: &ChainKey, b: &ChainKey) -> bool {
    a.instance.0.eq_ignore_ascii_case(&b.instance.0)
        && a.database.0.eq_ignore_ascii_case(&b.database.0)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use filetime::FileTime;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn key() -> ChainKey {
        ChainKey::new("MSSQLSERVER", "Canal33")
    }

    #[test]
    fn naming_convention_round_trips_through_stamp() {
        let name = full_backup_name("live01", &key(), "260101", "020000");
        assert_eq!(name, "live01-MSSQLSERVER-Canal33-260101-020000-full.backup");
        assert_eq!(full_backup_stamp(&name, "live01", &key()), Some("260101-020000"));
    }

    #[test]
    fn stamp_rejects_other_chains_and_shapes() {
        let k = key();
        assert_eq!(
            full_backup_stamp("live01-MSSQLSERVER-Canal34-260101-020000-full.backup", "live01", &k),
            None
        );
        assert_eq!(
            full_backup_stamp("live01-MSSQLSERVER-Canal33-2601-020000-full.backup", "live01", &k),
            None
        );
        assert_eq!(
            full_backup_stamp("live01-MSSQLSERVER-Canal33-260101-020000-diff.backup", "live01", &k),
            None
        );
        assert_eq!(
            full_backup_stamp("live02-MSSQLSERVER-Canal33-260101-020000-full.backup", "live01", &k),
            None
        );
    }

    #[test]
    fn empty_host_accepts_any_host() {
        assert_eq!(
            full_backup_stamp("live02-MSSQLSERVER-Canal33-260101-020000-full.backup", "", &key()),
            Some("260101-020000")
        );
    }

    #[test]
    fn local_search_takes_greatest_stamp() {
        let dir = TempDir::new().expect("dir");
        for (date, time) in [("251231", "230000"), ("260102", "020000"), ("260101", "020000")] {
            fs::write(dir.path().join(full_backup_name("live01", &key(), date, time)), b"x")
                .expect("write");
        }
        fs::write(
            dir.path().join("live01-MSSQLSERVER-Canal33-260103-020000-diff.backup"),
            b"x",
        )
        .expect("write");

        let found = find_latest_local_full(dir.path(), "live01", &key()).expect("found");
        assert_eq!(
            found.file_name().and_then(|n| n.to_str()),
            Some("live01-MSSQLSERVER-Canal33-260102-020000-full.backup")
        );
    }

    #[test]
    fn local_search_in_missing_dir_is_none() {
        let dir = TempDir::new().expect("dir");
        assert_eq!(find_latest_local_full(&dir.path().join("absent"), "live01", &key()), None);
    }

    fn write_report(dir: &Path, name: &str, mode: &str, dummy: bool, age: Duration) -> PathBuf {
        let path = dir.join(name);
        let body = json!({
            "command": "mssql",
            "verb": "backup",
            "host": "live01",
            "instance": "MSSQLSERVER",
            "database": "Canal33",
            "mode": mode,
            "output": format!("D:\\Backups\\{name}.backup"),
            "dummy": dummy
        });
        fs::write(&path, body.to_string()).expect("write report");
        let when = FileTime::from_unix_time(1_767_225_600 - age.as_secs() as i64, 0);
        filetime::set_file_mtime(&path, when).expect("mtime");
        path
    }

    #[test]
    fn remote_scan_prefers_newest_real_full() {
        let dir = TempDir::new().expect("dir");
        write_report(dir.path(), "old-full.json", "full", false, Duration::from_secs(7200));
        write_report(dir.path(), "new-full.json", "full", false, Duration::from_secs(3600));
        write_report(dir.path(), "dummy-full.json", "full", true, Duration::from_secs(60));
        write_report(dir.path(), "diff.json", "diff", false, Duration::from_secs(30));
        fs::write(dir.path().join("broken.json"), "{").expect("write");

        let report = find_latest_remote_full(dir.path(), "json", &key()).expect("full");
        assert_eq!(report.output, "D:\\Backups\\new-full.json.backup");
    }

    #[test]
    fn remote_scan_without_full_is_none() {
        let dir = TempDir::new().expect("dir");
        write_report(dir.path(), "diff.json", "diff", false, Duration::from_secs(30));
        assert!(find_latest_remote_full(dir.path(), "json", &key()).is_none());
    }
}
