//! Shared helpers for event bus integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use beacon_events::{Event, EventBus, Unsubscribe};
use tokio::sync::mpsc;

/// Install a test-friendly tracing subscriber. Safe to call from every test.
///
/// Honours `RUST_LOG`, e.g. `RUST_LOG=beacon_events=debug cargo test`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Subscribe a handler that forwards every event it sees into a channel.
pub fn forward_to_channel(
    bus: &EventBus,
    event_type: &str,
) -> (Unsubscribe, mpsc::UnboundedReceiver<Arc<Event>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = bus.subscribe(event_type, move |event| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(event);
        }
    });
    (handle, rx)
}

/// Subscribe a handler that counts invocations.
pub fn count_into(bus: &EventBus, event_type: &str, counter: &Arc<AtomicUsize>) -> Unsubscribe {
    let counter = Arc::clone(counter);
    bus.subscribe(event_type, move |_event| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    })
}
