//! Per-event-type subscription bookkeeping.
//!
//! [`SubscriptionRegistry`] maps an event type to its subscribers in
//! registration order. Writers take the exclusive lock only to mutate the map;
//! delivery takes the shared lock only long enough to copy the subscriber list
//! for one event type, so handlers never run while the lock is held.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use beacon_core::types::Timestamp;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use uuid::Uuid;

use crate::event::Event;

/// Type-erased subscriber callback.
pub type Handler = Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, ()> + Send + Sync>;

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A registered `(event_type, handler)` pair.
#[derive(Clone)]
pub struct Subscription {
    /// Bus-generated id, unique for the lifetime of the process.
    pub id: Uuid,
    pub event_type: String,
    pub handler: Handler,
    pub created_at: Timestamp,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// SubscriptionRegistry
// ---------------------------------------------------------------------------

/// Subscribers grouped by event type.
///
/// An event type's entry is removed as soon as its last subscriber leaves.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscribers: RwLock<HashMap<String, IndexMap<Uuid, Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type` and return the removal handle.
    pub fn subscribe(self: &Arc<Self>, event_type: String, handler: Handler) -> Unsubscribe {
        let subscription = Subscription {
            id: Uuid::new_v4(),
            event_type: event_type.clone(),
            handler,
            created_at: chrono::Utc::now(),
        };
        let id = subscription.id;

        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type.clone())
            .or_default()
            .insert(id, subscription);

        tracing::debug!(event_type = %event_type, subscription_id = %id, "Subscribed");

        Unsubscribe {
            registry: Arc::downgrade(self),
            event_type,
            id,
            done: AtomicBool::new(false),
        }
    }

    /// Remove a single subscription. Returns whether it was present.
    pub fn remove(&self, event_type: &str, id: Uuid) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(set) = subscribers.get_mut(event_type) else {
            return false;
        };
        let removed = set.shift_remove(&id).is_some();
        if set.is_empty() {
            subscribers.remove(event_type);
        }
        removed
    }

    /// Copy the subscribers for `event_type` in registration order.
    pub fn snapshot(&self, event_type: &str) -> Vec<Subscription> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of subscribers currently registered for `event_type`.
    pub fn count(&self, event_type: &str) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .map_or(0, IndexMap::len)
    }

    /// Number of event types with at least one subscriber.
    pub fn event_type_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

// ---------------------------------------------------------------------------
// Unsubscribe
// ---------------------------------------------------------------------------

/// Removal handle returned by `subscribe`.
///
/// Dropping the handle does NOT unsubscribe; the subscription then lives as
/// long as the bus.
#[must_use = "dropping the handle leaves the subscription registered for the bus lifetime"]
pub struct Unsubscribe {
    registry: Weak<SubscriptionRegistry>,
    event_type: String,
    id: Uuid,
    done: AtomicBool,
}

impl Unsubscribe {
    /// Id of the subscription this handle controls.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Remove the subscription. Idempotent: later calls do nothing.
    pub fn unsubscribe(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            if registry.remove(&self.event_type, self.id) {
                tracing::debug!(
                    event_type = %self.event_type,
                    subscription_id = %self.id,
                    "Unsubscribed"
                );
            }
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("event_type", &self.event_type)
            .field("id", &self.id)
            .field("done", &self.done.load(Ordering::Acquire))
            .finish()
    }
}
