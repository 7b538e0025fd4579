//! Bus-driven invalidation of a cache-aside loader.
//!
//! Each test publishes invalidation events through a real [`EventBus`] and
//! checks load-function call counts to see which keys were reloaded.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use beacon_cache::{
    publish_invalidation, CacheAsideLoader, InvalidationBinder, InvalidationEvent, MemoryStore,
    Store, StoreError,
};
use beacon_events::{Event, EventBus};

use common::{init_tracing, settle};

const INVALIDATED: &str = "test.invalidated";

/// Counts loads per key.
#[derive(Default)]
struct LoadCounter {
    calls: Mutex<HashMap<String, usize>>,
}

impl LoadCounter {
    async fn get<K>(&self, loader: &CacheAsideLoader<K, String>, key: K) -> String
    where
        K: Eq + std::hash::Hash + Clone + std::fmt::Display + Send + Sync + 'static,
    {
        let name = key.to_string();
        let calls = &self.calls;
        loader
            .get(&key, move || async move {
                *calls.lock().unwrap().entry(name.clone()).or_default() += 1;
                Ok::<_, anyhow::Error>(format!("value-{name}"))
            })
            .await
            .unwrap()
    }

    fn count(&self, key: &str) -> usize {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

async fn warm(counter: &LoadCounter, loader: &CacheAsideLoader<String, String>, keys: &[&str]) {
    for key in keys {
        counter.get(loader, key.to_string()).await;
    }
}

// ---------------------------------------------------------------------------
// Test: an empty key list clears everything
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_key_list_clears_all_entries() {
    init_tracing();
    let bus = EventBus::default();
    let loader = Arc::new(CacheAsideLoader::<String, String>::in_memory("dataset"));
    let _binder = InvalidationBinder::bind(&bus, INVALIDATED, Arc::clone(&loader));
    bus.start().unwrap();
    let counter = LoadCounter::default();
    warm(&counter, &loader, &["a", "b", "c"]).await;

    publish_invalidation(&bus, INVALIDATED, "test", InvalidationEvent::all())
        .await
        .unwrap();
    settle(&bus).await;
    warm(&counter, &loader, &["a", "b", "c"]).await;

    for key in ["a", "b", "c"] {
        assert_eq!(counter.count(key), 2, "{key} should have been reloaded");
    }
}

// ---------------------------------------------------------------------------
// Test: specific keys clear only those keys
// ---------------------------------------------------------------------------

#[tokio::test]
async fn specific_keys_clear_only_those_entries() {
    let bus = EventBus::default();
    let loader = Arc::new(CacheAsideLoader::<String, String>::in_memory("dataset"));
    let _binder = InvalidationBinder::bind(&bus, INVALIDATED, Arc::clone(&loader));
    bus.start().unwrap();
    let counter = LoadCounter::default();
    warm(&counter, &loader, &["a", "b", "c"]).await;

    publish_invalidation(&bus, INVALIDATED, "test", InvalidationEvent::keys(["a", "c"]))
        .await
        .unwrap();
    settle(&bus).await;
    warm(&counter, &loader, &["a", "b", "c"]).await;

    assert_eq!(counter.count("a"), 2);
    assert_eq!(counter.count("b"), 1);
    assert_eq!(counter.count("c"), 2);
}

// ---------------------------------------------------------------------------
// Test: other event types leave the cache alone
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unrelated_event_types_are_ignored() {
    let bus = EventBus::default();
    let loader = Arc::new(CacheAsideLoader::<String, String>::in_memory("dataset"));
    let binder = InvalidationBinder::bind(&bus, INVALIDATED, Arc::clone(&loader));
    assert_eq!(binder.event_type(), INVALIDATED);
    bus.start().unwrap();
    let counter = LoadCounter::default();
    warm(&counter, &loader, &["a"]).await;

    publish_invalidation(&bus, "other.invalidated", "test", InvalidationEvent::all())
        .await
        .unwrap();
    settle(&bus).await;
    warm(&counter, &loader, &["a"]).await;

    assert_eq!(counter.count("a"), 1);
}

// ---------------------------------------------------------------------------
// Test: a payload that is not an invalidation event clears everything
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_payload_clears_all_entries() {
    let bus = EventBus::default();
    let loader = Arc::new(CacheAsideLoader::<String, String>::in_memory("dataset"));
    let _binder = InvalidationBinder::bind(&bus, INVALIDATED, Arc::clone(&loader));
    bus.start().unwrap();
    let counter = LoadCounter::default();
    warm(&counter, &loader, &["a", "b"]).await;

    let event =
        Event::new(INVALIDATED).with_payload(serde_json::json!({ "affected_keys": "a" }));
    bus.publish(event).await.unwrap();
    settle(&bus).await;
    warm(&counter, &loader, &["a", "b"]).await;

    assert_eq!(counter.count("a"), 2);
    assert_eq!(counter.count("b"), 2);
}

// ---------------------------------------------------------------------------
// Test: bad keys are skipped without blocking the rest of the batch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unparseable_keys_are_skipped() {
    let bus = EventBus::default();
    let loader = Arc::new(CacheAsideLoader::<u32, String>::in_memory("numbers"));
    let _binder = InvalidationBinder::bind(&bus, INVALIDATED, Arc::clone(&loader));
    bus.start().unwrap();
    let counter = LoadCounter::default();
    for key in [1u32, 2, 3] {
        counter.get(&loader, key).await;
    }

    publish_invalidation(
        &bus,
        INVALIDATED,
        "test",
        InvalidationEvent::keys(["1", "not-a-number", "3"]),
    )
    .await
    .unwrap();
    settle(&bus).await;
    for key in [1u32, 2, 3] {
        counter.get(&loader, key).await;
    }

    assert_eq!(counter.count("1"), 2);
    assert_eq!(counter.count("2"), 1);
    assert_eq!(counter.count("3"), 2);
}

/// Memory store whose deletes fail for one poisoned key.
struct FlakyStore {
    inner: MemoryStore<String, String>,
    poisoned: &'static str,
    deletes: AtomicUsize,
}

#[async_trait]
impl Store<String, String> for FlakyStore {
    async fn get(&self, key: &String) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: String, value: String) -> Result<(), StoreError> {
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &String) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if key == self.poisoned {
            return Err(StoreError::Backend(format!("cannot delete {key}")));
        }
        self.inner.delete(key).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.inner.clear().await
    }
}

#[tokio::test]
async fn failing_delete_does_not_abort_the_batch() {
    init_tracing();
    let bus = EventBus::default();
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        poisoned: "b",
        deletes: AtomicUsize::new(0),
    });
    let loader = Arc::new(CacheAsideLoader::new(
        "flaky",
        Arc::clone(&store) as Arc<dyn Store<String, String>>,
    ));
    let _binder = InvalidationBinder::bind(&bus, INVALIDATED, Arc::clone(&loader));
    bus.start().unwrap();
    let counter = LoadCounter::default();
    warm(&counter, &loader, &["a", "b", "c"]).await;

    publish_invalidation(&bus, INVALIDATED, "test", InvalidationEvent::keys(["a", "b", "c"]))
        .await
        .unwrap();
    settle(&bus).await;
    warm(&counter, &loader, &["a", "b", "c"]).await;

    assert_eq!(store.deletes.load(Ordering::SeqCst), 3);
    assert_eq!(counter.count("a"), 2);
    assert_eq!(counter.count("b"), 1);
    assert_eq!(counter.count("c"), 2);
}

// ---------------------------------------------------------------------------
// Test: dropping the binder unsubscribes it
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dropped_binder_stops_invalidating() {
    let bus = EventBus::default();
    let loader = Arc::new(CacheAsideLoader::<String, String>::in_memory("dataset"));
    let binder = InvalidationBinder::bind(&bus, INVALIDATED, Arc::clone(&loader));
    assert_eq!(bus.subscriber_count(INVALIDATED), 1);
    bus.start().unwrap();
    let counter = LoadCounter::default();
    warm(&counter, &loader, &["a"]).await;

    drop(binder);
    assert_eq!(bus.subscriber_count(INVALIDATED), 0);

    publish_invalidation(&bus, INVALIDATED, "test", InvalidationEvent::all())
        .await
        .unwrap();
    settle(&bus).await;
    warm(&counter, &loader, &["a"]).await;

    assert_eq!(counter.count("a"), 1);
}
