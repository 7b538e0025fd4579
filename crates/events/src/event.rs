//! The event envelope carried by the bus.

use std::collections::HashMap;

use beacon_core::types::Timestamp;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A typed message published on the [`EventBus`](crate::bus::EventBus).
///
/// Constructed via [`Event::new`] and enriched with the builder methods
/// [`with_source`](Event::with_source),
/// [`with_metadata`](Event::with_metadata),
/// [`with_payload`](Event::with_payload) and [`with_data`](Event::with_data).
///
/// Once published the bus shares the event as `Arc<Event>`, so subscribers
/// only ever see it immutably.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Dot-separated event name used for subscriber matching, e.g.
    /// `"user.created"`.
    pub event_type: String,

    /// Time-ordered unique id, for tracing only. The bus never checks it.
    pub id: Uuid,

    /// Name of the component that produced the event. Empty when unset.
    pub source: String,

    /// When the event was created (UTC).
    pub timestamp: Timestamp,

    /// Free-form string annotations (correlation ids and the like).
    pub metadata: HashMap<String, String>,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,
}

impl Event {
    /// Create a new event with only the required `event_type`.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            id: Uuid::now_v7(),
            source: String::new(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            payload: serde_json::Value::Object(Default::default()),
        }
    }

    /// Set the producing component.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Add a metadata entry, replacing any previous value for `key`.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the raw JSON payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Serialize `data` into the payload.
    pub fn with_data<T: Serialize>(mut self, data: &T) -> Result<Self, serde_json::Error> {
        self.payload = serde_json::to_value(data)?;
        Ok(self)
    }

    /// Decode the payload into a typed value.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct UserCreated {
        user_id: i64,
        email: String,
    }

    #[test]
    fn new_event_has_empty_optional_fields() {
        let event = Event::new("bare.event");
        assert_eq!(event.event_type, "bare.event");
        assert!(event.source.is_empty());
        assert!(event.metadata.is_empty());
        assert!(event.payload.is_object());
    }

    #[test]
    fn builder_sets_source_and_metadata() {
        let event = Event::new("user.created")
            .with_source("test-service")
            .with_metadata("trace_id", "abc")
            .with_metadata("trace_id", "def");

        assert_eq!(event.source, "test-service");
        assert_eq!(event.metadata.len(), 1);
        assert_eq!(event.metadata["trace_id"], "def");
    }

    #[test]
    fn typed_payload_decodes() {
        let data = UserCreated {
            user_id: 7,
            email: "a@example.com".into(),
        };
        let event = Event::new("user.created").with_data(&data).unwrap();

        assert_eq!(event.payload["user_id"], 7);
        assert_eq!(event.data::<UserCreated>().unwrap(), data);
    }

    #[test]
    fn mismatched_payload_fails_to_decode() {
        let event = Event::new("user.created").with_payload(serde_json::json!({"user_id": "x"}));
        assert!(event.data::<UserCreated>().is_err());
    }

    #[test]
    fn ids_are_distinct() {
        let a = Event::new("a");
        let b = Event::new("a");
        assert_ne!(a.id, b.id);
    }
}
