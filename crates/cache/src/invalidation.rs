//! Event-driven cache invalidation.
//!
//! Producers publish an [`InvalidationEvent`] on a dataset-specific event type
//! whenever the underlying data changes. An [`InvalidationBinder`] subscribed
//! to that type deletes the named keys from its loader, or clears the loader
//! entirely when the key list is empty.

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;

use beacon_events::{BusError, Event, EventBus, Unsubscribe};
use serde::{Deserialize, Serialize};

use crate::loader::CacheAsideLoader;

// ---------------------------------------------------------------------------
// InvalidationEvent
// ---------------------------------------------------------------------------

/// Payload of an invalidation event.
///
/// An empty `affected_keys` list means "clear everything", not "nothing
/// changed".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    #[serde(default)]
    pub affected_keys: Vec<String>,
}

impl InvalidationEvent {
    /// Invalidate every cached entry.
    pub fn all() -> Self {
        Self::default()
    }

    /// Invalidate only the given keys.
    ///
    /// Passing no keys yields the same event as [`all`](Self::all).
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            affected_keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn clears_all(&self) -> bool {
        self.affected_keys.is_empty()
    }

    /// Wrap the payload in a bus event of `event_type`.
    pub fn into_event(self, event_type: impl Into<String>, source: impl Into<String>) -> Event {
        Event::new(event_type)
            .with_source(source)
            .with_payload(serde_json::json!({ "affected_keys": self.affected_keys }))
    }
}

/// Publish `invalidation` on `bus` as an event of `event_type`.
pub async fn publish_invalidation(
    bus: &EventBus,
    event_type: &str,
    source: &str,
    invalidation: InvalidationEvent,
) -> Result<(), BusError> {
    tracing::debug!(
        event_type,
        keys = invalidation.affected_keys.len(),
        "Publishing cache invalidation"
    );
    bus.publish(invalidation.into_event(event_type, source)).await
}

// ---------------------------------------------------------------------------
// InvalidationBinder
// ---------------------------------------------------------------------------

/// Keeps a loader subscribed to its invalidation event type.
///
/// The subscription is made at construction and removed when the binder is
/// dropped; hold the binder next to the loader it serves.
pub struct InvalidationBinder {
    subscription: Unsubscribe,
}

impl InvalidationBinder {
    /// Subscribe `loader` to invalidation events of `event_type` on `bus`.
    ///
    /// Keys in the event are parsed with `K::from_str`; keys that fail to
    /// parse or to delete are logged and skipped.
    pub fn bind<K, V>(
        bus: &EventBus,
        event_type: impl Into<String>,
        loader: Arc<CacheAsideLoader<K, V>>,
    ) -> Self
    where
        K: Eq + Hash + Clone + fmt::Display + FromStr + Send + Sync + 'static,
        K::Err: fmt::Display,
        V: Clone + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        tracing::debug!(
            event_type = %event_type,
            cache = %loader.name(),
            "Binding cache invalidation"
        );

        let subscription = bus.subscribe(event_type, move |event| {
            let loader = Arc::clone(&loader);
            async move { apply(&loader, &event).await }
        });

        Self { subscription }
    }

    /// The event type this binder listens on.
    pub fn event_type(&self) -> &str {
        self.subscription.event_type()
    }
}

impl Drop for InvalidationBinder {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

impl fmt::Debug for InvalidationBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationBinder")
            .field("event_type", &self.event_type())
            .finish()
    }
}

/// Apply one invalidation event to `loader`.
async fn apply<K, V>(loader: &CacheAsideLoader<K, V>, event: &Event)
where
    K: Eq + Hash + Clone + fmt::Display + FromStr + Send + Sync + 'static,
    K::Err: fmt::Display,
    V: Clone + Send + Sync + 'static,
{
    let invalidation = match event.data::<InvalidationEvent>() {
        Ok(invalidation) => invalidation,
        Err(e) => {
            // Unknown payload shape: stale data is worse than a cold cache.
            tracing::warn!(
                cache = %loader.name(),
                event_id = %event.id,
                error = %e,
                "Malformed invalidation payload, clearing cache"
            );
            InvalidationEvent::all()
        }
    };

    if invalidation.clears_all() {
        match loader.clear().await {
            Ok(()) => tracing::info!(cache = %loader.name(), "Cache cleared by invalidation event"),
            Err(e) => tracing::error!(
                cache = %loader.name(),
                error = %e,
                "Failed to clear cache on invalidation"
            ),
        }
        return;
    }

    let mut invalidated = 0usize;
    for raw in &invalidation.affected_keys {
        let key = match raw.parse::<K>() {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(cache = %loader.name(), key = %raw, error = %e, "Unparseable invalidation key");
                continue;
            }
        };
        if let Err(e) = loader.delete(&key).await {
            tracing::warn!(cache = %loader.name(), key = %raw, error = %e, "Failed to invalidate key");
            continue;
        }
        invalidated += 1;
    }

    tracing::info!(
        cache = %loader.name(),
        invalidated,
        requested = invalidation.affected_keys.len(),
        "Cache keys invalidated"
    );
}
