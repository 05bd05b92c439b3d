use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::call::CallStatus;

/// One update published for dashboards to subscribe to (C8). Publish-only
/// from the session runtime; delivery is at-most-once and best-effort —
/// a lagging subscriber misses events rather than blocking the publisher,
/// which is exactly `broadcast`'s native behavior.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DashboardEvent {
    TranscriptUpdate {
        #[serde(rename = "callId")]
        call_id: String,
        speaker: Speaker,
        text: String,
        timestamp: DateTime<Utc>,
        #[serde(rename = "isPartial")]
        is_partial: bool,
        #[serde(rename = "isInterruption", skip_serializing_if = "std::ops::Not::not")]
        is_interruption: bool,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        truncated: bool,
    },
    CallStatusChanged {
        #[serde(rename = "callId")]
        call_id: String,
        status: CallStatus,
    },
    ContextRequest {
        #[serde(rename = "callId")]
        call_id: String,
        question: String,
        #[serde(rename = "requestedBy")]
        requested_by: String,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// Fan-out channel for [`DashboardEvent`]s. Cheap to clone; every clone
/// shares the same underlying ring buffer.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DashboardEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. Returns silently if there are no subscribers —
    /// that's a normal idle state, not an error.
    pub fn publish(&self, event: DashboardEvent) {
        let _ = self.sender.send(event);
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

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(DashboardEvent::CallStatusChanged {
            call_id: "CA1".into(),
            status: CallStatus::InProgress,
        });
        let received = rx.recv().await.unwrap();
        match received {
            DashboardEvent::CallStatusChanged { call_id, status } => {
                assert_eq!(call_id, "CA1");
                assert_eq!(status, CallStatus::InProgress);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(DashboardEvent::CallStatusChanged {
            call_id: "CA1".into(),
            status: CallStatus::Completed,
        });
    }
}
