//! Lifecycle event notification
//!
//! The bundle manager announces what it did through a [`LifecycleNotifier`].
//! A notifier accepts raw publications, forwards pre-built [`Envelope`]s,
//! and hands out filtered subscriptions. [`EventExchange`] is the
//! in-process implementation backed by a broadcast channel.

pub mod exchange;
pub mod filter;

pub use exchange::{EventExchange, Subscription};
pub use filter::Filter;

use crate::error::{BundleError, Result};
use crate::identifiers;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Topic published after a bundle is created
pub const TOPIC_BUNDLE_CREATE: &str = "/bundles/create";

/// Topic published after a bundle is deleted
pub const TOPIC_BUNDLE_DELETE: &str = "/bundles/delete";

/// A timestamped, namespaced event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// When the event was published
    pub timestamp: DateTime<Utc>,
    /// Namespace the event belongs to
    pub namespace: String,
    /// Topic, e.g. `/bundles/create`
    pub topic: String,
    /// Opaque event payload
    pub event: Vec<u8>,
}

impl Envelope {
    /// Create an envelope stamped with the current time
    pub fn new(namespace: &str, topic: &str, event: Vec<u8>) -> Self {
        Self {
            timestamp: Utc::now(),
            namespace: namespace.to_string(),
            topic: topic.to_string(),
            event,
        }
    }

    /// Look up a filterable field by name
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "namespace" => Some(&self.namespace),
            "topic" => Some(&self.topic),
            _ => None,
        }
    }

    fn validate(&self) -> Result<()> {
        identifiers::validate(&self.namespace).map_err(|e| {
            BundleError::Notify(format!("envelope namespace: {}", e))
        })?;
        validate_topic(&self.topic)
    }
}

/// Sink for lifecycle events
pub trait LifecycleNotifier: Send + Sync {
    /// Publish an event payload under a topic
    fn publish(&self, namespace: &str, topic: &str, event: &[u8]) -> Result<()>;

    /// Re-dispatch an envelope built elsewhere, keeping its timestamp
    fn forward(&self, envelope: Envelope) -> Result<()>;

    /// Subscribe to envelopes matching any of `filters` (all when empty)
    fn subscribe(&self, filters: &[String]) -> Result<Subscription>;
}

/// Payload of [`TOPIC_BUNDLE_CREATE`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleCreated {
    /// Bundle id
    pub id: String,
    /// Bundle directory
    pub bundle: PathBuf,
}

/// Payload of [`TOPIC_BUNDLE_DELETE`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleDeleted {
    /// Bundle id
    pub id: String,
}

/// Validate a topic such as `/bundles/create`
pub fn validate_topic(topic: &str) -> Result<()> {
    let invalid = |reason: &str| BundleError::InvalidTopic {
        topic: topic.to_string(),
        reason: reason.to_string(),
    };

    let rest = topic
        .strip_prefix('/')
        .ok_or_else(|| invalid("must start with '/'"))?;

    if rest.is_empty() {
        return Err(invalid("must have at least one component"));
    }

    for component in rest.split('/') {
        identifiers::validate(component).map_err(|e| invalid(&e.to_string()))?;
    }

    Ok(())
}
