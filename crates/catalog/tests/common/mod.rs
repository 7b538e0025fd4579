//! Shared helpers for integration tests.

use beacon_events::EventBus;
use tokio_util::sync::CancellationToken;

/// Install a test-writer subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Wait for every delivery in flight, then resume the bus.
pub async fn settle(bus: &EventBus) {
    bus.shutdown(&CancellationToken::new()).await.unwrap();
    bus.start().unwrap();
}
