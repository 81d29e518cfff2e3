//! Process-wide activity pub/sub.
//!
//! The core publishes one tagged event per decision or monitored exec;
//! delivery to external subscribers (SSE fan-out) is the front end's job.
//! Publishing never blocks: lagging subscribers drop the oldest events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// A tagged, ISO-timestamped activity event.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEvent {
    /// Event tag (`allowed`, `denied`, `exec:monitored`, `exec:denied`,
    /// `security:warning`, ...).
    pub kind: String,
    /// Publication timestamp. Ordering is only guaranteed within a single
    /// subscriber.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub data: Value,
}

impl ActivityEvent {
    /// Create an event stamped now.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// The single process-wide activity channel.
pub struct ActivityChannel {
    tx: broadcast::Sender<ActivityEvent>,
}

impl ActivityChannel {
    /// Create a channel buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. A send with no subscribers is not an error.
    pub fn publish(&self, event: ActivityEvent) {
        let _ = self.tx.send(event);
    }

    /// Tag-and-publish convenience.
    pub fn emit(&self, kind: impl Into<String>, data: Value) {
        self.publish(ActivityEvent::new(kind, data));
    }

    /// Subscribe to the stream from this point on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        self.tx.subscribe()
    }

    /// Current subscriber count.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ActivityChannel {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let channel = ActivityChannel::default();
        let mut rx = channel.subscribe();

        channel.emit("denied", json!({"target": "http://example.com"}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, "denied");
        assert_eq!(event.data["target"], "http://example.com");
    }

    #[test]
    fn publish_without_subscribers_does_not_error() {
        let channel = ActivityChannel::default();
        channel.emit("allowed", json!({}));
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn events_serialize_with_iso_timestamp() {
        let event = ActivityEvent::new("security:warning", json!({"n": 11}));
        let value = serde_json::to_value(&event).unwrap();
        // chrono serializes DateTime<Utc> as RFC 3339 / ISO 8601
        let ts = value["timestamp"].as_str().unwrap();
        assert!(ts.contains('T'));
        assert_eq!(value["kind"], "security:warning");
    }
}
