//! Atomic directory removal and bounded file capture

use super::Filesystem;
use crate::error::{BundleError, Result};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Prefix of the temporary name a tree is renamed to before deletion
pub const DELETE_PREFIX: &str = ".del-";

/// Bytes read from a possibly-missing file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedFile {
    /// File contents, at most the requested limit
    pub bytes: Vec<u8>,
    /// Whether the file held more than the limit
    pub truncated: bool,
}

impl CapturedFile {
    /// Whether nothing was captured
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Whether a file name is a leftover of [`atomic_remove`]
pub fn is_delete_leftover(name: &str) -> bool {
    name.starts_with(DELETE_PREFIX)
}

/// Remove a directory tree so that no observer sees it half-deleted.
///
/// The tree is first renamed to a unique hidden sibling, then deleted. A
/// missing `path` is success. If the recursive delete fails the error is
/// returned, but `path` itself no longer exists at that point.
pub fn atomic_remove(fs: &dyn Filesystem, path: &Path) -> Result<()> {
    let (parent, name) = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => (parent, name),
        _ => return Err(BundleError::InvalidPath(path.to_path_buf())),
    };

    let tmp: PathBuf = parent.join(format!(
        "{}{}-{}",
        DELETE_PREFIX,
        name.to_string_lossy(),
        Uuid::new_v4().simple()
    ));

    match fs.rename(path, &tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("{} already removed", path.display());
            return Ok(());
        }
        Err(e) => return Err(BundleError::fs("rename for delete", path, e)),
    }

    remove_all(fs, &tmp).map_err(|e| BundleError::fs("remove", &tmp, e))
}

/// Remove whatever is at `path`: a directory tree, a file or a symlink.
///
/// Symlinks are unlinked, never followed. A missing `path` is success.
pub fn remove_all(fs: &dyn Filesystem, path: &Path) -> io::Result<()> {
    let result = match fs.symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs.remove_dir_all(path),
        Ok(_) => fs.remove_file(path),
        Err(e) => Err(e),
    };

    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Read at most `limit` bytes of a file that may not exist
pub fn capture_bounded_file(path: &Path, limit: u64) -> io::Result<CapturedFile> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CapturedFile::default()),
        Err(e) => return Err(e),
    };

    // One byte past the limit tells a file of exactly `limit` bytes apart
    // from a larger one.
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1)).read_to_end(&mut bytes)?;

    let truncated = bytes.len() as u64 > limit;
    if truncated {
        bytes.truncate(limit as usize);
    }

    Ok(CapturedFile { bytes, truncated })
}

/// Create a directory and its parents, treating an existing one as success
pub fn ensure_dir(fs: &dyn Filesystem, path: &Path, mode: u32) -> Result<()> {
    match fs.create_dir_all(path, mode) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(BundleError::fs("create directory", path, e)),
    }
}
