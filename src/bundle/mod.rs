//! OCI bundle management
//!
//! A bundle is the directory a low-level runtime is pointed at:
//!
//! ```text
//! <primary_root>/<namespace>/<id>/
//!     rootfs/        mount target for the container root filesystem
//!     work -> <state_root>/<namespace>/<id>
//!     config.json    OCI runtime configuration, verbatim
//!     panic.log      optional, written by the runtime shim
//! ```

pub mod manager;
pub mod permissions;
pub mod rollback;

pub use manager::BundleManager;
pub use permissions::needs_relaxed_permissions;

use crate::error::Result;
use crate::identifiers;
use crate::namespaces::Context;
use std::path::{Path, PathBuf};

/// Name of the runtime configuration file
pub const CONFIG_FILENAME: &str = "config.json";

/// Name of the root filesystem directory
pub const ROOTFS_DIR: &str = "rootfs";

/// Name of the symlink to the working directory
pub const WORK_LINK: &str = "work";

/// Name of the diagnostic log a crashing shim may leave behind
pub const PANIC_LOG: &str = "panic.log";

/// A bundle on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    /// Bundle id, unique within its namespace
    pub id: String,
    /// Namespace the bundle belongs to
    pub namespace: String,
    /// Bundle directory
    pub path: PathBuf,
}

impl Bundle {
    /// Handle for a bundle that already exists under `root`.
    ///
    /// Only computes paths; nothing on disk is read or changed.
    pub fn load(root: &Path, ctx: &Context, id: &str) -> Result<Self> {
        let namespace = ctx.namespace_required()?;
        identifiers::validate(id)?;

        Ok(Self {
            id: id.to_string(),
            namespace: namespace.to_string(),
            path: root.join(namespace).join(id),
        })
    }

    /// Root filesystem directory
    pub fn rootfs(&self) -> PathBuf {
        self.path.join(ROOTFS_DIR)
    }

    /// Symlink to the working directory
    pub fn work_link(&self) -> PathBuf {
        self.path.join(WORK_LINK)
    }

    /// Runtime configuration file
    pub fn config_path(&self) -> PathBuf {
        self.path.join(CONFIG_FILENAME)
    }

    /// Shim panic log
    pub fn panic_log(&self) -> PathBuf {
        self.path.join(PANIC_LOG)
    }

    /// Working directory of this bundle under `state_root`
    pub fn work_path(&self, state_root: &Path) -> PathBuf {
        state_root.join(&self.namespace).join(&self.id)
    }
}
