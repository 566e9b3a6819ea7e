//! Error types for rune-bundle

use std::path::PathBuf;
use thiserror::Error;

/// Result type for bundle operations
pub type Result<T> = std::result::Result<T, BundleError>;

/// Bundle error types
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("invalid identifier {id:?}: {reason}")]
    InvalidIdentifier { id: String, reason: String },

    #[error("invalid context: {0}")]
    InvalidContext(String),

    #[error("bundle already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("bundle not found: {0}")]
    NotFound(String),

    #[error("unmount rootfs {}: {source}", path.display())]
    MountDetachFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove both bundle and workdir locations: {work}: {bundle}")]
    PartialCleanupFailed {
        bundle: Box<BundleError>,
        work: Box<BundleError>,
    },

    #[error("failed to capture diagnostic file {}: {source}", path.display())]
    DiagnosticCaptureFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{op} {}: {source}", path.display())]
    Filesystem {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid path: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("invalid topic {topic:?}: {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("invalid filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("notify error: {0}")]
    Notify(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(String),
}

impl BundleError {
    /// Attach an operation and path to an I/O error
    pub fn fs(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BundleError::Filesystem {
            op,
            path: path.into(),
            source,
        }
    }

    /// Whether the error describes something that is already gone
    pub fn is_not_found(&self) -> bool {
        match self {
            BundleError::NotFound(_) => true,
            BundleError::Filesystem { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
