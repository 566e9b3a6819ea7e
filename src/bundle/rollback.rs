//! Scoped rollback of partially created bundles
//!
//! Each creation step records the path it produced. Paths recorded as
//! owned are removed, newest first, if the guard is dropped without
//! [`Rollback::commit`]. Shared paths are recorded for the log only and are
//! never removed.

use crate::fs::Filesystem;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Whether a recorded path belongs to the operation that recorded it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Created by this operation; removed on rollback
    Owned,
    /// Shared with other bundles; kept on rollback
    Shared,
}

#[derive(Debug)]
struct Entry {
    path: PathBuf,
    ownership: Ownership,
}

/// Rollback guard for one create operation
pub struct Rollback<'a> {
    fs: &'a dyn Filesystem,
    entries: Vec<Entry>,
    armed: bool,
}

impl<'a> Rollback<'a> {
    /// Start an empty guard
    pub fn new(fs: &'a dyn Filesystem) -> Self {
        Self {
            fs,
            entries: Vec::new(),
            armed: true,
        }
    }

    /// Record a path created by this operation
    pub fn owned(&mut self, path: &Path) {
        self.push(path, Ownership::Owned);
    }

    /// Record a path that other bundles may depend on
    pub fn shared(&mut self, path: &Path) {
        self.push(path, Ownership::Shared);
    }

    fn push(&mut self, path: &Path, ownership: Ownership) {
        self.entries.push(Entry {
            path: path.to_path_buf(),
            ownership,
        });
    }

    /// Paths that would be removed on rollback, in removal order
    pub fn pending(&self) -> Vec<&Path> {
        self.entries
            .iter()
            .rev()
            .filter(|e| e.ownership == Ownership::Owned)
            .map(|e| e.path.as_path())
            .collect()
    }

    /// Keep everything recorded so far
    pub fn commit(mut self) {
        self.armed = false;
    }

    fn unwind(&mut self) {
        while let Some(entry) = self.entries.pop() {
            if entry.ownership == Ownership::Shared {
                continue;
            }
            // Removal errors must not mask the error that caused the rollback
            if let Err(e) = self.fs.remove_dir_all(&entry.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!("rollback of {} failed: {}", entry.path.display(), e);
                }
            }
        }
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.unwind();
        }
    }
}
