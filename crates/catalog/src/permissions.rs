//! Role permission lookups, cached per role.
//!
//! Permission sets are loaded from a [`PermissionSource`] on first use and
//! dropped whenever an event of type
//! [`PERMISSIONS_INVALIDATED`](beacon_core::event_types::PERMISSIONS_INVALIDATED)
//! names the role (or names no role at all).

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use beacon_cache::{
    publish_invalidation, CacheAsideLoader, CacheError, InvalidationBinder, InvalidationEvent,
    MemoryStore, Store,
};
use beacon_core::error::CoreError;
use beacon_core::event_types::PERMISSIONS_INVALIDATED;
use beacon_core::roles::ROLE_ADMIN;
use beacon_events::{BusError, EventBus};

const CACHE_NAME: &str = "role_permissions";
const EVENT_SOURCE: &str = "catalog.permissions";

/// Cached value: the permissions granted to one role.
pub type PermissionSet = Arc<HashSet<String>>;

/// Where role permissions are read from on a cache miss.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    /// Permission names granted to `role`. An unknown role has none.
    async fn permissions_for_role(&self, role: &str) -> Result<Vec<String>, CoreError>;
}

/// Role to permission-set lookups with cache-aside loading.
pub struct PermissionCatalog {
    loader: Arc<CacheAsideLoader<String, PermissionSet>>,
    source: Arc<dyn PermissionSource>,
    binder: InvalidationBinder,
}

impl PermissionCatalog {
    /// Build a catalog over an in-memory store, bound to `bus`.
    pub fn new(bus: &EventBus, source: Arc<dyn PermissionSource>) -> Self {
        Self::with_store(bus, source, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(
        bus: &EventBus,
        source: Arc<dyn PermissionSource>,
        store: Arc<dyn Store<String, PermissionSet>>,
    ) -> Self {
        let loader = Arc::new(CacheAsideLoader::new(CACHE_NAME, store));
        let binder = InvalidationBinder::bind(bus, PERMISSIONS_INVALIDATED, Arc::clone(&loader));
        Self {
            loader,
            source,
            binder,
        }
    }

    /// Permissions granted to `role`.
    pub async fn permissions(&self, role: &str) -> Result<PermissionSet, CacheError> {
        let source = Arc::clone(&self.source);
        let owned = role.to_string();
        self.loader
            .get(&owned, move || async move {
                let granted = source.permissions_for_role(role).await?;
                tracing::debug!(role, count = granted.len(), "Loaded role permissions");
                Ok::<_, CoreError>(Arc::new(granted.into_iter().collect::<HashSet<_>>()))
            })
            .await
    }

    /// Whether `role` holds `permission`. The admin role holds every
    /// permission and never touches the cache.
    pub async fn has_permission(&self, role: &str, permission: &str) -> Result<bool, CacheError> {
        if role == ROLE_ADMIN {
            return Ok(true);
        }
        Ok(self.permissions(role).await?.contains(permission))
    }

    /// The event type this catalog invalidates on.
    pub fn event_type(&self) -> &str {
        self.binder.event_type()
    }

    /// Publish an invalidation for `roles`. No roles invalidates every role.
    pub async fn invalidate_roles<I, S>(bus: &EventBus, roles: I) -> Result<(), BusError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        publish_invalidation(
            bus,
            PERMISSIONS_INVALIDATED,
            EVENT_SOURCE,
            InvalidationEvent::keys(roles),
        )
        .await
    }
}
