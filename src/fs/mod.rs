//! Filesystem primitives used by the bundle manager
//!
//! Every mutation the manager performs goes through the [`Filesystem`]
//! trait. [`HostFs`] talks to the real filesystem; tests substitute an
//! implementation that fails chosen operations.

pub mod atomic;

pub use atomic::{atomic_remove, capture_bounded_file, ensure_dir, remove_all, CapturedFile};

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Primitive filesystem operations
pub trait Filesystem: Send + Sync {
    /// Create a single directory, failing if it already exists
    fn create_dir(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Create a directory and any missing parents
    fn create_dir_all(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Set permission bits on a path
    fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Create a symbolic link at `link` pointing to `target`
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;

    /// Read the target of a symbolic link
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    /// Metadata of a path without following a final symlink
    fn symlink_metadata(&self, path: &Path) -> io::Result<fs::Metadata>;

    /// Write a file, creating or truncating it
    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> io::Result<()>;

    /// Rename a path within the same filesystem
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Remove an empty directory
    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    /// Remove a file or symlink
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Remove a directory tree without following symlinks
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// The host filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFs;

impl Filesystem for HostFs {
    fn create_dir(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::DirBuilder::new().mode(mode).create(path)
    }

    fn create_dir_all(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::DirBuilder::new().recursive(true).mode(mode).create(path)
    }

    fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(target, link)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(path)
    }

    fn symlink_metadata(&self, path: &Path) -> io::Result<fs::Metadata> {
        fs::symlink_metadata(path)
    }

    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(path)?;
        file.write_all(contents)?;
        file.sync_all()
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }
}
