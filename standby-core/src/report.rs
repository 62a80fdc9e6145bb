//! Execution reports dropped by the live node.
//!
//! Reports arrive as loosely-shaped JSON written by software on another
//! host. They are read into [`ExecutionReport`] (every field optional) and
//! then narrowed into a [`BackupReport`], where the fields the chain
//! resolver depends on are mandatory.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ReportError;
use crate::types::{ChainKey, DatabaseName, InstanceName};

/// Verb carried by backup executions.
pub const BACKUP_VERB: &str = "backup";

/// Kind of backup described by a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    Full,
    Diff,
}

impl BackupMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "full" => Some(Self::Full),
            "diff" | "differential" => Some(Self::Diff),
            _ => None,
        }
    }
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Diff => f.write_str("diff"),
        }
    }
}

/// Raw execution report as written by the live node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub verb: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    /// `true`/`false`, `0`/`1`, or their string forms.
    #[serde(default, deserialize_with = "lenient_flag")]
    pub dummy: bool,
    #[serde(default, alias = "start", deserialize_with = "lenient_timestamp")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "end", deserialize_with = "lenient_timestamp")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// A validated report describing one completed backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupReport {
    /// Report file this value was read from.
    pub source: PathBuf,
    pub command: String,
    pub host: String,
    pub instance: InstanceName,
    pub database: DatabaseName,
    pub mode: BackupMode,
    /// Backup file path in the live host's own filesystem notation.
    pub output: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl BackupReport {
    pub fn chain_key(&self) -> ChainKey {
        ChainKey {
            instance: self.instance.clone(),
            database: self.database.clone(),
        }
    }

    /// Read and narrow the report at `path`.
    ///
    /// Returns `Ok(None)` for reports that are not real backups: dummy runs,
    /// verbs other than `backup`, or modes other than full/diff.
    pub fn load(path: &Path) -> Result<Option<Self>, ReportError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let report: ExecutionReport =
            serde_json::from_str(&raw).map_err(|source| ReportError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        report.into_backup(path)
    }
}

impl ExecutionReport {
    pub fn is_backup(&self) -> bool {
        !self.dummy
            && self
                .verb
                .as_deref()
                .map(|verb| verb.eq_ignore_ascii_case(BACKUP_VERB))
                .unwrap_or(false)
    }

    /// Narrow into a [`BackupReport`].
    ///
    /// A backup report missing `instance`, `database`, `mode` or `output` is
    /// an error rather than an ignored report.
    pub fn into_backup(self, source: &Path) -> Result<Option<BackupReport>, ReportError> {
        if !self.is_backup() {
            return Ok(None);
        }

        let missing = |field: &'static str| ReportError::MissingField {
            path: source.to_path_buf(),
            field,
        };

        let instance = non_empty(self.instance).ok_or_else(|| missing("instance"))?;
        let database = non_empty(self.database).ok_or_else(|| missing("database"))?;
        let mode_raw = non_empty(self.mode).ok_or_else(|| missing("mode"))?;
        let output = non_empty(self.output).ok_or_else(|| missing("output"))?;

        let Some(mode) = BackupMode::parse(&mode_raw) else {
            return Ok(None);
        };

        Ok(Some(BackupReport {
            source: source.to_path_buf(),
            command: self.command.unwrap_or_default(),
            host: self.host.unwrap_or_default(),
            instance: InstanceName(instance),
            database: DatabaseName(database),
            mode,
            output,
            started_at: self.started_at,
            ended_at: self.ended_at,
        }))
    }
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(flag) => flag,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        ),
        _ => false,
    })
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(raw) => parse_timestamp(&raw),
        Value::Null => None,
        other => {
            tracing::debug!("ignoring non-string report timestamp {}", other);
            None
        }
    })
}

/// RFC 3339, or `YYYY-MM-DD HH:MM:SS[.fraction]` taken as UTC.
///
/// Anything else yields `None`; timestamps only order reports.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    tracing::debug!("ignoring unparseable report timestamp '{}'", raw);
    None
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<Option<BackupReport>, ReportError> {
        let report: ExecutionReport = serde_json::from_value(value).expect("report json");
        report.into_backup(Path::new("/reports/r.json"))
    }

    #[test]
    fn full_backup_report_is_narrowed() {
        let report = parse(json!({
            "command": "mssql",
            "verb": "backup",
            "host": "live01",
            "instance": "MSSQLSERVER",
            "database": "Canal33",
            "mode": "full",
            "output": "D:\\Backups\\live01-MSSQLSERVER-Canal33-260101-020000-full.backup",
            "dummy": false,
            "startedAt": "2026-01-01T02:00:00Z",
            "endedAt": "2026-01-01T02:10:00Z"
        }))
        .expect("parse")
        .expect("backup report");

        assert_eq!(report.mode, BackupMode::Full);
        assert_eq!(report.instance.0, "MSSQLSERVER");
        assert_eq!(report.host, "live01");
        assert!(report.started_at.is_some());
        assert_eq!(report.source, PathBuf::from("/reports/r.json"));
    }

    #[test]
    fn dummy_report_is_ignored() {
        let report = parse(json!({
            "verb": "backup",
            "instance": "MSSQLSERVER",
            "database": "Canal33",
            "mode": "full",
            "output": "D:\\x.backup",
            "dummy": true
        }))
        .expect("parse");
        assert!(report.is_none());
    }

    #[test]
    fn non_backup_verb_is_ignored_even_without_mode() {
        let report = parse(json!({ "verb": "restore", "database": "Canal33" })).expect("parse");
        assert!(report.is_none());
    }

    #[test]
    fn backup_without_mode_is_an_error() {
        let err = parse(json!({
            "verb": "backup",
            "instance": "MSSQLSERVER",
            "database": "Canal33",
            "output": "D:\\x.backup"
        }))
        .unwrap_err();
        assert!(
            matches!(err, ReportError::MissingField { field: "mode", .. }),
            "got: {err}"
        );
    }

    #[test]
    fn differential_alias_maps_to_diff() {
        let report = parse(json!({
            "verb": "BACKUP",
            "instance": "MSSQLSERVER",
            "database": "Canal33",
            "mode": "Differential",
            "output": "D:\\x.backup"
        }))
        .expect("parse")
        .expect("backup");
        assert_eq!(report.mode, BackupMode::Diff);
    }

    #[test]
    fn log_mode_is_not_a_chain_member() {
        let report = parse(json!({
            "verb": "backup",
            "instance": "MSSQLSERVER",
            "database": "Canal33",
            "mode": "log",
            "output": "D:\\x.trn"
        }))
        .expect("parse");
        assert!(report.is_none());
    }

    #[test]
    fn load_distinguishes_unreadable_from_malformed() {
        let dir = tempfile::tempdir().expect("tempdir");

        let missing = BackupReport::load(&dir.path().join("absent.json"));
        assert!(matches!(missing, Err(ReportError::Io { .. })));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").expect("write");
        assert!(matches!(
            BackupReport::load(&broken),
            Err(ReportError::Parse { .. })
        ));

        let restore = dir.path().join("restore.json");
        std::fs::write(&restore, r#"{"verb":"restore","mode":"full"}"#).expect("write");
        assert!(BackupReport::load(&restore).expect("load").is_none());
    }

    #[test]
    fn numeric_and_string_dummy_flags_are_accepted() {
        let base = json!({
            "verb": "backup",
            "instance": "MSSQLSERVER",
            "database": "Canal33",
            "mode": "full",
            "output": "D:\\x.backup"
        });
        for (flag, dummy) in [
            (json!(0), false),
            (json!(1), true),
            (json!("0"), false),
            (json!("true"), true),
            (json!(null), false),
        ] {
            let mut value = base.clone();
            value["dummy"] = flag.clone();
            let report: ExecutionReport = serde_json::from_value(value).expect("report json");
            assert_eq!(report.dummy, dummy, "dummy = {flag}");
        }

        let mut real = base.clone();
        real["dummy"] = json!(0);
        assert!(parse(real).expect("parse").is_some());
    }

    #[test]
    fn local_timestamps_parse_and_garbage_is_dropped() {
        let report = parse(json!({
            "verb": "backup",
            "instance": "MSSQLSERVER",
            "database": "Canal33",
            "mode": "diff",
            "output": "D:\\x.backup",
            "startedAt": "2026-01-01 02:00:00.123456",
            "endedAt": "last tuesday"
        }))
        .expect("parse")
        .expect("backup");

        let expected = Utc.with_ymd_and_hms(2026, 1, 1, 2, 0, 0).unwrap();
        let started = report.started_at.expect("started_at");
        assert_eq!(started.timestamp(), expected.timestamp());
        assert!(report.ended_at.is_none());

        assert_eq!(parse_timestamp("2026-01-01 02:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-01T02:00:00+00:00"), Some(expected));
    }
}
