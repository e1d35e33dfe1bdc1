//! Graph event bus: lifecycle notifications for discovery and monitoring.
//!
//! The bus is an explicitly constructed object that callers pass to the
//! components that publish on it. Publishing never blocks and never fails:
//! with no subscribers the event is simply dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events published while discovering, recording, and monitoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GraphEvent {
    CycleStarted {
        cycle: u64,
        at: DateTime<Utc>,
    },
    CycleSkipped {
        reason: String,
    },
    CycleCompleted {
        cycle: u64,
        alerts: usize,
        duration_ms: u64,
    },
    CycleFailed {
        cycle: u64,
        error: String,
    },
    FetchCompleted {
        provider: String,
        service: String,
        resource_type: String,
        region: String,
        duration_ms: u64,
        success: bool,
        items: usize,
    },
    DiscoveryCompleted {
        provider: String,
        nodes: usize,
        edges: usize,
        errors: usize,
        duration_ms: u64,
    },
    SyncRecorded {
        provider: String,
        sync_id: String,
        changes: usize,
    },
    EventsRecorded {
        provider: String,
        events: usize,
        changes: usize,
    },
    AlertsDispatched {
        destination: String,
        alerts: usize,
    },
    DestinationFailed {
        destination: String,
        error: String,
    },
}

impl GraphEvent {
    /// Return the event name, as used in the serialized `event` tag.
    pub fn event_name(&self) -> &'static str {
        match self {
            GraphEvent::CycleStarted { .. } => "cycle_started",
            GraphEvent::CycleSkipped { .. } => "cycle_skipped",
            GraphEvent::CycleCompleted { .. } => "cycle_completed",
            GraphEvent::CycleFailed { .. } => "cycle_failed",
            GraphEvent::FetchCompleted { .. } => "fetch_completed",
            GraphEvent::DiscoveryCompleted { .. } => "discovery_completed",
            GraphEvent::SyncRecorded { .. } => "sync_recorded",
            GraphEvent::EventsRecorded { .. } => "events_recorded",
            GraphEvent::AlertsDispatched { .. } => "alerts_dispatched",
            GraphEvent::DestinationFailed { .. } => "destination_failed",
        }
    }
}

/// Broadcast bus for [`GraphEvent`]s. Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GraphEvent>,
}

impl EventBus {
    /// Create a bus that buffers up to `capacity` events per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Returns the number of subscribers that received it.
    pub fn publish(&self, event: GraphEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        let delivered = bus.publish(GraphEvent::CycleSkipped {
            reason: "busy".into(),
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let clone = bus.clone();
        clone.publish(GraphEvent::SyncRecorded {
            provider: "aws".into(),
            sync_id: "s1".into(),
            changes: 3,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_name(), "sync_recorded");
    }

    #[test]
    fn test_event_serialization_tag() {
        let json = serde_json::to_value(GraphEvent::CycleSkipped {
            reason: "busy".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "cycle_skipped");
        assert_eq!(json["reason"], "busy");
    }
}
