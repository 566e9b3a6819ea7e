//! Namespace context
//!
//! Bundles are partitioned by namespace. Callers carry the namespace in a
//! [`Context`] and every operation that touches storage resolves it through
//! [`Context::namespace_required`].

use crate::error::{BundleError, Result};
use crate::identifiers;

/// Environment variable consulted by [`Context::from_env`]
pub const NAMESPACE_ENV: &str = "RUNE_NAMESPACE";

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "default";

/// Execution context for bundle operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    namespace: Option<String>,
}

impl Context {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the namespace from the environment, if set
    pub fn from_env() -> Self {
        Self {
            namespace: std::env::var(NAMESPACE_ENV)
                .ok()
                .filter(|ns| !ns.is_empty()),
        }
    }

    /// Set the namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Namespace, if one was set
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Resolve the namespace, failing if it is missing or malformed
    pub fn namespace_required(&self) -> Result<&str> {
        let ns = self
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| BundleError::InvalidContext("namespace is required".to_string()))?;

        identifiers::validate(ns).map_err(|e| {
            BundleError::InvalidContext(format!("namespace validation: {}", e))
        })?;

        Ok(ns)
    }
}
