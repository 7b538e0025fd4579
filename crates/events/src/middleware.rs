//! Ordered processing steps run on every event before subscriber delivery.
//!
//! Each [`Middleware`] receives the event plus a [`Next`] continuation. It may
//! pass the event on unchanged, replace it with a new one, or return an error,
//! which aborts delivery of that event entirely.
//!
//! ```ignore
//! struct RequireSource;
//!
//! #[async_trait]
//! impl Middleware for RequireSource {
//!     async fn handle(&self, event: Arc<Event>, next: Next<'_>) -> Result<Arc<Event>, BusError> {
//!         if event.source.is_empty() {
//!             return Err(BusError::rejected(self.name(), "missing source"));
//!         }
//!         next.run(event).await
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BusError;
use crate::event::Event;

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name used in logs and rejection errors.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Process `event` and hand it (or a replacement) to `next`.
    ///
    /// Returning without calling `next` skips the rest of the chain but still
    /// delivers the returned event.
    async fn handle(&self, event: Arc<Event>, next: Next<'_>) -> Result<Arc<Event>, BusError>;
}

/// Continuation over the remaining middleware in the chain.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
}

impl Next<'_> {
    /// Run the rest of the chain. Resolves to the event subscribers will see.
    pub async fn run(self, event: Arc<Event>) -> Result<Arc<Event>, BusError> {
        match self.chain.split_first() {
            Some((head, rest)) => head.handle(event, Next { chain: rest }).await,
            None => Ok(event),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The ordered middleware chain owned by a bus.
#[derive(Clone, Default)]
pub struct Pipeline {
    chain: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware; it runs after every previously pushed one.
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.chain.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Run `event` through the whole chain in registration order.
    pub async fn run(&self, event: Arc<Event>) -> Result<Arc<Event>, BusError> {
        Next { chain: &self.chain }.run(event).await
    }
}

// ---------------------------------------------------------------------------
// LoggingMiddleware
// ---------------------------------------------------------------------------

/// Traces every event entering delivery and every rejection further down the
/// chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn handle(&self, event: Arc<Event>, next: Next<'_>) -> Result<Arc<Event>, BusError> {
        tracing::debug!(
            event_type = %event.event_type,
            event_id = %event.id,
            source = %event.source,
            "Delivering event"
        );

        let event_type = event.event_type.clone();
        let result = next.run(event).await;
        if let Err(e) = &result {
            tracing::debug!(event_type = %event_type, error = %e, "Event rejected downstream");
        }
        result
    }
}
