//! In-process event exchange

use super::filter::{matches_any, Filter};
use super::{validate_topic, Envelope, LifecycleNotifier};
use crate::error::{BundleError, Result};
use crate::identifiers;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Broadcasts envelopes to every live subscription
#[derive(Debug, Clone)]
pub struct EventExchange {
    sender: broadcast::Sender<Envelope>,
}

impl EventExchange {
    /// Create an exchange buffering up to `capacity` envelopes per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn dispatch(&self, envelope: Envelope) {
        let topic = envelope.topic.clone();
        // Sending only fails when nobody is listening
        if self.sender.send(envelope).is_err() {
            debug!("no subscribers for {}", topic);
        }
    }
}

impl Default for EventExchange {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_CAPACITY)
    }
}

impl LifecycleNotifier for EventExchange {
    fn publish(&self, namespace: &str, topic: &str, event: &[u8]) -> Result<()> {
        identifiers::validate(namespace)
            .map_err(|e| BundleError::Notify(format!("envelope namespace: {}", e)))?;
        validate_topic(topic)?;

        self.dispatch(Envelope::new(namespace, topic, event.to_vec()));
        Ok(())
    }

    fn forward(&self, envelope: Envelope) -> Result<()> {
        envelope.validate()?;
        self.dispatch(envelope);
        Ok(())
    }

    fn subscribe(&self, filters: &[String]) -> Result<Subscription> {
        Ok(Subscription {
            receiver: self.sender.subscribe(),
            filters: Filter::parse_all(filters)?,
        })
    }
}

/// A live, filtered sequence of envelopes
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<Envelope>,
    filters: Vec<Filter>,
}

impl Subscription {
    /// Wait for the next matching envelope.
    ///
    /// Returns `None` once every sender is gone. Envelopes dropped because
    /// this subscriber fell behind are skipped.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if matches_any(&self.filters, &envelope) => return Some(envelope),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("subscriber lagged, {} envelopes dropped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next matching envelope if one is already queued
    pub fn try_recv(&mut self) -> Option<Envelope> {
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) if matches_any(&self.filters, &envelope) => return Some(envelope),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!("subscriber lagged, {} envelopes dropped", missed);
                }
                Err(_) => return None,
            }
        }
    }
}
