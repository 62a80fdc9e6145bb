//! Polling differ over a watched directory tree.
//!
//! Each [`ScanState::scan`] walks the roots and compares the set of
//! matching files with the previous completed scan:
//!
//! 1. fewer files than before → [`ScanEvent::Reset`], baseline dropped;
//! 2. first scan (or first after a reset) → baseline stored silently;
//! 3. more files than before → [`ScanEvent::New`] with the set difference;
//! 4. otherwise → [`ScanEvent::NoChange`].
//!
//! Files present before the first scan are never reported.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of one scan cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// Files that appeared since the previous scan, sorted.
    New(Vec<PathBuf>),
    NoChange,
    /// The tree shrank; the next scan re-establishes a baseline.
    Reset,
}

/// Per-job scan state.
#[derive(Debug, Clone)]
pub struct ScanState {
    previous: BTreeSet<PathBuf>,
    running: BTreeSet<PathBuf>,
    first: bool,
    extension: String,
}

impl ScanState {
    /// `extension` is matched case-insensitively, without the leading dot.
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            previous: BTreeSet::new(),
            running: BTreeSet::new(),
            first: true,
            extension: extension.into(),
        }
    }

    /// `true` until a baseline has been established.
    pub fn is_first(&self) -> bool {
        self.first
    }

    /// Number of files in the current baseline.
    pub fn known(&self) -> usize {
        self.previous.len()
    }

    /// Walk `roots` and compare against the previous scan.
    pub fn scan(&mut self, roots: &[PathBuf]) -> ScanEvent {
        self.running.clear();
        for root in roots {
            collect_matching(root, &self.extension, &mut self.running);
        }
        self.settle()
    }

    /// Compare an externally collected file set against the previous scan.
    pub fn observe<I>(&mut self, found: I) -> ScanEvent
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.running.clear();
        self.running.extend(found);
        self.settle()
    }

    fn settle(&mut self) -> ScanEvent {
        let running = std::mem::take(&mut self.running);

        if running.len() < self.previous.len() {
            tracing::warn!(
                "scan shrank from {} to {} files; resetting baseline",
                self.previous.len(),
                running.len()
            );
            self.previous.clear();
            self.first = true;
            return ScanEvent::Reset;
        }

        if self.first {
            tracing::info!("scan baseline established with {} files", running.len());
            self.first = false;
            self.previous = running;
            return ScanEvent::NoChange;
        }

        if running.len() > self.previous.len() {
            let added: Vec<PathBuf> = running.difference(&self.previous).cloned().collect();
            self.previous = running;
            return ScanEvent::New(added);
        }

        ScanEvent::NoChange
    }
}

/// Recursively collect files under `root` whose extension matches.
///
/// Unreadable directories are logged and skipped; a missing root yields
/// nothing.
pub(crate) fn collect_matching(root: &Path, extension: &str, out: &mut BTreeSet<PathBuf>) {
    let mut dirs = vec![root.to_path_buf()];
    while let Some(current) = dirs.pop() {
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!("cannot read {}: {}", current.display(), err);
                continue;
            }
        };
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("cannot read entry in {}: {}", current.display(), err);
                    continue;
                }
            };
            let Ok(ty) = entry.file_type() else { continue };
            let path = entry.path();
            if ty.is_dir() {
                dirs.push(path);
            } else if has_extension(&path, extension) {
                out.insert(path);
            }
        }
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}
