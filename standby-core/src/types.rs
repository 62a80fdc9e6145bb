//! Domain types shared by the sync pipeline and the daemon.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A database-server instance name (e.g. `MSSQLSERVER`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceName(pub String);

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for InstanceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InstanceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A database name inside an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatabaseName(pub String);

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DatabaseName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DatabaseName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Chain key
// ---------------------------------------------------------------------------

/// Identity of a backup chain: one chain per (instance, database).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainKey {
    pub instance: InstanceName,
    pub database: DatabaseName,
}

impl ChainKey {
    pub fn new(instance: impl Into<InstanceName>, database: impl Into<DatabaseName>) -> Self {
        Self {
            instance: instance.into(),
            database: database.into(),
        }
    }
}

impl fmt::Display for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instance, self.database)
    }
}

// ---------------------------------------------------------------------------
// Monitored service
// ---------------------------------------------------------------------------

/// The service whose backups this daemon mirrors.
///
/// Instance and database names compare case-insensitively, matching the
/// database server's own identifier rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredService {
    pub name: String,
    pub instance: InstanceName,
    pub database: DatabaseName,
}

impl MonitoredService {
    pub fn matches(&self, instance: &InstanceName, database: &DatabaseName) -> bool {
        self.instance.0.eq_ignore_ascii_case(&instance.0)
            && self.database.0.eq_ignore_ascii_case(&database.0)
    }

    pub fn chain_key(&self) -> ChainKey {
        ChainKey {
            instance: self.instance.clone(),
            database: self.database.clone(),
        }
    }
}
