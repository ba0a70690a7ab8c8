// SPDX-License-Identifier: MIT

//! In-process event bus
//!
//! Event triggers and waiting runs consume events from here; the engine
//! publishes run lifecycle events (`run.started`, `run.completed`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// A named event with a JSON payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique id, used for redelivery dedupe
    #[serde(default = "new_event_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default = "Utc::now")]
    pub published_at: DateTime<Utc>,
}

fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: new_event_id(),
            name: name.into(),
            payload,
            published_at: Utc::now(),
        }
    }

    /// Same event with a caller-chosen id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event; returns the number of live subscribers
    pub fn publish(&self, event: Event) -> usize {
        log::debug!("Publishing event '{}' ({})", event.name, event.id);
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let sent = bus.publish(Event::new("invoice.created", json!({"id": 1})).with_id("evt-1"));
        assert_eq!(sent, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.id, "evt-1");
        assert_eq!(event.payload["id"], 1);
    }

    #[test]
    fn test_publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(Event::new("nobody.listens", Value::Null)), 0);
    }
}
