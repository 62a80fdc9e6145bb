//! Mirror files from the live node's share into the local backup directory.
//!
//! Paths in execution reports use the live host's own notation
//! (`D:\Backups\x.backup`, `\\srv\share\x.backup`, `/var/backups/x.backup`).
//! The volume or share prefix is replaced by the locally mounted share
//! root; directory and file components are kept as-is.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{io_err, SyncError};

/// Locally reachable mount of the live node's filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteShare {
    root: PathBuf,
}

impl RemoteShare {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a remote-local path onto the share.
    ///
    /// A path consisting only of a volume (`D:\`) maps to the share root.
    pub fn resolve(&self, remote_local: &str) -> Result<PathBuf, SyncError> {
        let mut resolved = self.root.clone();
        for component in remote_components(remote_local) {
            if component == ".." {
                return Err(SyncError::UnsafePath {
                    path: remote_local.to_string(),
                    reason: "parent components are not allowed",
                });
            }
            resolved.push(component);
        }
        Ok(resolved)
    }
}

/// Split a remote path into its directory/file components, dropping the
/// volume (`X:`) or UNC server/share prefix.
fn remote_components(remote_local: &str) -> impl Iterator<Item = &str> {
    let trimmed = remote_local.trim();
    let is_sep = |c: char| c == '\\' || c == '/';

    let rest = if let Some(unc) = trimmed
        .strip_prefix(r"\\")
        .or_else(|| trimmed.strip_prefix("//"))
    {
        let mut parts = unc.splitn(3, is_sep);
        let _server = parts.next();
        let _share = parts.next();
        parts.next().unwrap_or("")
    } else if has_drive_letter(trimmed) {
        &trimmed[2..]
    } else {
        trimmed
    };

    rest.split(is_sep).filter(|c| !c.is_empty() && *c != ".")
}

fn has_drive_letter(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Outcome of mirroring one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The file was copied.
    Copied { path: PathBuf, bytes: u64 },
    /// An identical-looking local copy already existed.
    Unchanged { path: PathBuf },
}

impl SyncOutcome {
    /// Local path of the mirrored file.
    pub fn path(&self) -> &Path {
        match self {
            Self::Copied { path, .. } | Self::Unchanged { path } => path,
        }
    }

    pub fn into_path(self) -> PathBuf {
        match self {
            Self::Copied { path, .. } | Self::Unchanged { path } => path,
        }
    }
}

/// Copies files from the share into a flat local directory.
#[derive(Debug, Clone)]
pub struct RemoteSync {
    share: RemoteShare,
    local_dir: PathBuf,
}

impl RemoteSync {
    pub fn new(share: RemoteShare, local_dir: impl Into<PathBuf>) -> Self {
        Self {
            share,
            local_dir: local_dir.into(),
        }
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    /// Mirror the file the live host knows as `remote_local`.
    ///
    /// Failures are logged here; callers treat them as "chain unresolved".
    pub fn sync(&self, remote_local: &str) -> Result<SyncOutcome, SyncError> {
        let result = self
            .share
            .resolve(remote_local)
            .and_then(|source| self.copy_in(&source));
        match &result {
            Ok(SyncOutcome::Copied { path, bytes }) => {
                tracing::info!("synced {} -> {} ({} bytes)", remote_local, path.display(), bytes)
            }
            Ok(SyncOutcome::Unchanged { path }) => {
                tracing::debug!("already synced: {}", path.display())
            }
            Err(err) => tracing::error!("sync of {} failed: {}", remote_local, err),
        }
        result
    }

    /// Copy a reachable `source` into the local directory.
    ///
    /// The copy goes through `<name>.standby.tmp` and is renamed into place.
    /// A local file with the same size and a modification time not older
    /// than the source is kept.
    pub fn copy_in(&self, source: &Path) -> Result<SyncOutcome, SyncError> {
        let name = source.file_name().ok_or_else(|| SyncError::UnsafePath {
            path: source.display().to_string(),
            reason: "no file name",
        })?;
        let source_meta = fs::metadata(source).map_err(|e| io_err(source, e))?;
        if !source_meta.is_file() {
            return Err(SyncError::UnsafePath {
                path: source.display().to_string(),
                reason: "not a regular file",
            });
        }

        fs::create_dir_all(&self.local_dir).map_err(|e| io_err(&self.local_dir, e))?;
        let target = self.local_dir.join(name);

        if let Ok(target_meta) = fs::metadata(&target) {
            let fresh = match (target_meta.modified(), source_meta.modified()) {
                (Ok(local), Ok(remote)) => local >= remote,
                _ => false,
            };
            if target_meta.len() == source_meta.len() && fresh {
                return Ok(SyncOutcome::Unchanged { path: target });
            }
        }

        let mut tmp_name = name.to_os_string();
        tmp_name.push(".standby.tmp");
        let tmp = self.local_dir.join(tmp_name);

        let bytes = match fs::copy(source, &tmp) {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = fs::remove_file(&tmp);
                return Err(io_err(source, err));
            }
        };
        if let Err(err) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(&target, err));
        }

        Ok(SyncOutcome::Copied {
            path: target,
            bytes,
        })
    }
}
