//! Bundle manager configuration
//!
//! Configuration can be built in code, loaded from a YAML file, or derived
//! from the invoking user's directories for rootless operation.

use crate::error::{BundleError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default root for bundle directories
pub const DEFAULT_PRIMARY_ROOT: &str = "/var/lib/rune/bundles";

/// Default root for bundle working directories
pub const DEFAULT_STATE_ROOT: &str = "/run/rune/bundles";

/// Default cap on captured diagnostic output (1 MiB)
pub const DEFAULT_DIAGNOSTIC_LIMIT: u64 = 1024 * 1024;

/// Default number of envelopes buffered per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for a [`BundleManager`](crate::BundleManager)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ManagerConfig {
    /// Root under which `<namespace>/<id>` bundle directories live
    pub primary_root: PathBuf,
    /// Root under which `<namespace>/<id>` working directories live
    pub state_root: PathBuf,
    /// Maximum number of bytes read from a bundle's panic log on delete
    pub diagnostic_limit: u64,
    /// Per-subscriber buffer of the in-process event exchange
    pub event_capacity: usize,
    /// Detach mounts lazily (`MNT_DETACH`) instead of failing on busy mounts
    pub lazy_unmount: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            primary_root: PathBuf::from(DEFAULT_PRIMARY_ROOT),
            state_root: PathBuf::from(DEFAULT_STATE_ROOT),
            diagnostic_limit: DEFAULT_DIAGNOSTIC_LIMIT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            lazy_unmount: false,
        }
    }
}

impl ManagerConfig {
    /// Create a configuration with explicit roots
    pub fn new(primary_root: impl Into<PathBuf>, state_root: impl Into<PathBuf>) -> Self {
        Self {
            primary_root: primary_root.into(),
            state_root: state_root.into(),
            ..Self::default()
        }
    }

    /// Configuration rooted in the current user's data and runtime directories
    pub fn user() -> Self {
        let data = dirs::data_dir().unwrap_or_else(|| PathBuf::from("/var/lib"));
        let runtime = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);

        Self::new(
            data.join("rune").join("bundles"),
            runtime.join("rune").join("bundles"),
        )
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BundleError::fs("read config", path, e))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ManagerConfig =
            serde_yaml::from_str(content).map_err(|e| BundleError::Yaml(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the manager cannot work with
    pub fn validate(&self) -> Result<()> {
        if !self.primary_root.is_absolute() {
            return Err(BundleError::InvalidConfig(format!(
                "primary_root must be absolute: {}",
                self.primary_root.display()
            )));
        }

        if !self.state_root.is_absolute() {
            return Err(BundleError::InvalidConfig(format!(
                "state_root must be absolute: {}",
                self.state_root.display()
            )));
        }

        if self.primary_root == self.state_root {
            return Err(BundleError::InvalidConfig(
                "primary_root and state_root must differ".to_string(),
            ));
        }

        if self.event_capacity == 0 {
            return Err(BundleError::InvalidConfig(
                "event_capacity must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
