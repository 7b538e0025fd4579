//! Cache-aside loading with singleflight coalescing and event-driven
//! invalidation.
//!
//! - [`CacheAsideLoader`]: get-or-load over an abstract [`Store`], running the
//!   load function once per key per reload cycle.
//! - [`Store`] / [`MemoryStore`]: the backend abstraction and its in-process
//!   implementation.
//! - [`Group`]: the singleflight primitive the loader is built on.
//! - [`InvalidationBinder`] / [`InvalidationEvent`]: wiring from bus events to
//!   `delete` / `clear`.

pub mod invalidation;
pub mod loader;
pub mod singleflight;
pub mod store;

pub use invalidation::{publish_invalidation, InvalidationBinder, InvalidationEvent};
pub use loader::{CacheAsideLoader, CacheError};
pub use singleflight::Group;
pub use store::{MemoryStore, Store, StoreError};
