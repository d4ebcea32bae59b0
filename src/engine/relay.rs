// NATS event relay
// Carries activity events from writer processes into the local event bus

//! # NATS Event Relay
//!
//! Writers usually run in other processes than the router. They publish
//! JSON-encoded [`Event`]s on `router.events.<event_name>` with
//! [`NatsEventRelay::publish_remote`]; every router process runs a relay that
//! subscribes to `router.events.>` and publishes what it receives into its
//! own [`EventBus`]. Malformed messages are logged and skipped.

use async_nats::Client;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::EventBus;
use crate::models::Event;
use crate::{Result, RouterCacheError};

/// Default subject prefix for relayed events.
pub const EVENT_SUBJECT_PREFIX: &str = "router.events";

/// Subject an event is published on.
pub fn subject_for(prefix: &str, event_name: &str) -> String {
    format!("{}.{}", prefix, event_name)
}

/// Decode a relayed event, or `None` when the payload is not an [`Event`].
pub fn decode_event(payload: &[u8]) -> Option<Event> {
    match serde_json::from_slice::<Event>(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "Skipping malformed relayed event");
            None
        }
    }
}

/// Subscribes to remote events and feeds them into the local bus.
pub struct NatsEventRelay {
    client: Client,
    bus: EventBus,
    subject_prefix: String,
}

impl NatsEventRelay {
    pub fn new(client: Client, bus: EventBus) -> Self {
        Self {
            client,
            bus,
            subject_prefix: EVENT_SUBJECT_PREFIX.to_string(),
        }
    }

    pub fn with_subject_prefix(mut self, subject_prefix: impl Into<String>) -> Self {
        self.subject_prefix = subject_prefix.into();
        self
    }

    /// Relay events until the subscription ends.
    pub async fn run(&self) -> Result<()> {
        let subject = format!("{}.>", self.subject_prefix);
        let mut subscriber = self.client.subscribe(subject.clone()).await.map_err(|e| {
            RouterCacheError::Store(anyhow::anyhow!("Failed to subscribe to {}: {}", subject, e))
        })?;
        info!(subject = %subject, "Relaying remote events");

        while let Some(message) = subscriber.next().await {
            if let Some(event) = decode_event(&message.payload) {
                debug!(event = %event.name, subject = %message.subject, "Relayed event");
                self.bus.publish(event);
            }
        }

        info!(subject = %subject, "Event relay subscription closed");
        Ok(())
    }

    /// Run the relay on the current runtime.
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }

    /// Publish an event for relays in other processes.
    pub async fn publish_remote(client: &Client, subject_prefix: &str, event: &Event) -> Result<()> {
        let subject = subject_for(subject_prefix, &event.name);
        client
            .publish(subject.clone(), serde_json::to_vec(event)?.into())
            .await
            .map_err(|e| {
                RouterCacheError::Store(anyhow::anyhow!("Failed to publish event to {}: {}", subject, e))
            })?;
        client
            .flush()
            .await
            .map_err(|e| RouterCacheError::Store(anyhow::anyhow!("Failed to flush event: {}", e)))?;
        Ok(())
    }
}
