//! Beacon in-process event bus.
//!
//! This crate provides the publish/subscribe building blocks every cache
//! and consumer in the workspace relies on:
//!
//! - [`EventBus`]: lifecycle-managed hub with a bounded intake queue, a
//!   single dispatcher task and one delivery task per event.
//! - [`Event`]: the canonical event envelope.
//! - [`SubscriptionRegistry`]: per-event-type subscriber bookkeeping behind a
//!   read-write lock.
//! - [`Middleware`] / [`Pipeline`]: ordered steps run before delivery.
//! - [`EventBusConfig`]: queue capacity and shutdown timeout.

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod middleware;
pub mod registry;

pub use bus::EventBus;
pub use config::EventBusConfig;
pub use error::BusError;
pub use event::Event;
pub use middleware::{LoggingMiddleware, Middleware, Next, Pipeline};
pub use registry::{Handler, Subscription, SubscriptionRegistry, Unsubscribe};
