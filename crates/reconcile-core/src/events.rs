//! Event publication
//!
//! The [`EventBus`] appends resource events to the owning resource's history
//! before broadcasting them, so history stays strictly ordered per resource.
//! Telemetry events are only broadcast.

use crate::storage::ResourceRepository;
use async_trait::async_trait;
use reconcile_types::{EventEnvelope, ReconcileEvent};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Channel capacity for the event stream
const EVENT_CHANNEL_CAPACITY: usize = 16384;

/// Sink for engine events. Publishing never fails.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: ReconcileEvent);
}

/// Records resource history and broadcasts every event
pub struct EventBus {
    repository: Arc<dyn ResourceRepository>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus recording history into `repository`
    pub fn new(repository: Arc<dyn ResourceRepository>) -> Self {
        Self::with_capacity(repository, EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(repository: Arc<dyn ResourceRepository>, capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self {
            repository,
            event_tx,
        }
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.event_tx.receiver_count()
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, event: ReconcileEvent) {
        if let ReconcileEvent::Resource(resource_event) = &event {
            if let Err(e) = self.repository.append_history(resource_event.clone()).await {
                warn!(
                    resource_id = %resource_event.resource_id,
                    event = ?resource_event.kind(),
                    error = %e,
                    "Failed to record resource history"
                );
            }
        }

        let envelope = EventEnvelope::new(event);
        debug!(event_id = %envelope.id, severity = ?envelope.severity, "Publishing event");

        // No subscribers is fine
        let _ = self.event_tx.send(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use chrono::Utc;
    use reconcile_types::{
        ResourceEvent, ResourceEventDetail, ResourceId, ResourceKind, TelemetryEvent,
    };

    #[tokio::test]
    async fn test_resource_events_are_recorded_and_broadcast() {
        let storage = Arc::new(InMemoryStorage::new());
        let bus = EventBus::new(storage.clone());
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let id = ResourceId::new("ec2.aws:cluster:fnord-main");
        bus.publish(
            ResourceEvent::new(
                id.clone(),
                ResourceKind::new("ec2.aws/v1", "cluster"),
                "fnord",
                Utc::now(),
                ResourceEventDetail::Valid,
            )
            .into(),
        )
        .await;
        bus.publish(TelemetryEvent::ResourceCheckStarting.into()).await;

        assert!(matches!(rx.recv().await.unwrap().event, ReconcileEvent::Resource(_)));
        assert!(matches!(
            rx.recv().await.unwrap().event,
            ReconcileEvent::Telemetry(TelemetryEvent::ResourceCheckStarting)
        ));
        assert_eq!(storage.event_history(&id, 10).await.unwrap().len(), 1);
    }
}
