//! Cache-aside loading with singleflight coalescing.
//!
//! [`CacheAsideLoader::get`] returns a cached value when present. On a miss
//! concurrent callers for the same key are coalesced: one leader re-checks
//! the store, runs the load function, and stores the value only on success.
//! Every coalesced caller receives the leader's value or error. Failed loads
//! are never cached, so the next call retries.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::singleflight::Group;
use crate::store::{MemoryStore, Store, StoreError};

// ---------------------------------------------------------------------------
// CacheError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The load function failed. Shared by every caller coalesced into the
    /// failing round.
    #[error("Failed to load {key} into {cache}: {cause:#}")]
    Load {
        cache: String,
        key: String,
        cause: Arc<anyhow::Error>,
    },
}

impl CacheError {
    /// The load function's original error, if this is a load failure.
    pub fn load_cause(&self) -> Option<&anyhow::Error> {
        match self {
            CacheError::Load { cause, .. } => Some(cause),
            CacheError::Store(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// CacheAsideLoader
// ---------------------------------------------------------------------------

/// Get-or-load cache over an abstract [`Store`].
///
/// Values have no TTL; they stay cached until [`delete`](Self::delete) or
/// [`clear`](Self::clear), normally driven by an
/// [`InvalidationBinder`](crate::invalidation::InvalidationBinder).
pub struct CacheAsideLoader<K, V> {
    name: String,
    store: Arc<dyn Store<K, V>>,
    flights: Group<K, Result<V, CacheError>>,
    /// Keys with a load in progress, each with the number of invalidations
    /// that hit it since the load started. A load that raced an invalidation
    /// of its own key still returns its value but does not keep it cached.
    loading: Mutex<HashMap<K, u32>>,
}

impl<K, V> CacheAsideLoader<K, V>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a loader named `name` (used in logs and errors) over `store`.
    pub fn new(name: impl Into<String>, store: Arc<dyn Store<K, V>>) -> Self {
        Self {
            name: name.into(),
            store,
            flights: Group::new(),
            loading: Mutex::new(HashMap::new()),
        }
    }

    /// Create a loader backed by a fresh [`MemoryStore`].
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::new(name, Arc::new(MemoryStore::new()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of keys currently being loaded.
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    /// Return the cached value for `key`, loading it with `load` on a miss.
    pub async fn get<F, Fut, E>(&self, key: &K, load: F) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Into<anyhow::Error>,
    {
        if let Some(value) = self.store.get(key).await? {
            return Ok(value);
        }

        self.flights
            .work(key.clone(), move || async move {
                // Another leader may have populated the key between our miss
                // and our admission.
                if let Some(value) = self.store.get(key).await? {
                    return Ok(value);
                }

                let loading = Loading::start(&self.loading, key);
                tracing::debug!(cache = %self.name, key = %key, "Cache miss, loading");

                let value = load().await.map_err(|e| CacheError::Load {
                    cache: self.name.clone(),
                    key: key.to_string(),
                    cause: Arc::new(e.into()),
                })?;

                if loading.invalidated() {
                    tracing::debug!(
                        cache = %self.name,
                        key = %key,
                        "Invalidated during load, not caching result"
                    );
                } else if let Err(e) = self.store.set(key.clone(), value.clone()).await {
                    tracing::warn!(
                        cache = %self.name,
                        key = %key,
                        error = %e,
                        "Failed to populate cache"
                    );
                } else if loading.finish() {
                    // An invalidation landed while the value was being written.
                    tracing::debug!(
                        cache = %self.name,
                        key = %key,
                        "Invalidated during cache write, dropping entry"
                    );
                    if let Err(e) = self.store.delete(key).await {
                        tracing::warn!(
                            cache = %self.name,
                            key = %key,
                            error = %e,
                            "Failed to drop stale cache entry"
                        );
                    }
                }

                Ok::<V, CacheError>(value)
            })
            .await
    }

    /// Drop the cached value for `key`. The next `get` reloads it.
    pub async fn delete(&self, key: &K) -> Result<(), CacheError> {
        if let Some(hits) = lock(&self.loading).get_mut(key) {
            *hits = hits.saturating_add(1);
        }
        self.store.delete(key).await?;
        tracing::debug!(cache = %self.name, key = %key, "Cache entry invalidated");
        Ok(())
    }

    /// Drop every cached value.
    pub async fn clear(&self) -> Result<(), CacheError> {
        for hits in lock(&self.loading).values_mut() {
            *hits = hits.saturating_add(1);
        }
        self.store.clear().await?;
        tracing::debug!(cache = %self.name, "Cache cleared");
        Ok(())
    }
}

/// Registration of one in-progress load in the loader's `loading` map.
///
/// Only the singleflight leader for a key creates one, so there is at most
/// one per key. Dropping it (including on cancellation) deregisters the key.
struct Loading<'a, K: Eq + Hash> {
    loading: &'a Mutex<HashMap<K, u32>>,
    key: &'a K,
}

impl<'a, K: Eq + Hash + Clone> Loading<'a, K> {
    fn start(loading: &'a Mutex<HashMap<K, u32>>, key: &'a K) -> Self {
        lock(loading).insert(key.clone(), 0);
        Self { loading, key }
    }

    /// Whether the key was invalidated since the load started.
    fn invalidated(&self) -> bool {
        lock(self.loading).get(self.key).is_some_and(|&hits| hits > 0)
    }

    /// Deregister the key, reporting whether it was invalidated meanwhile.
    /// Check and removal happen under one lock, so an invalidation either
    /// counts here or runs its store delete after this returns.
    fn finish(&self) -> bool {
        lock(self.loading).remove(self.key).is_some_and(|hits| hits > 0)
    }
}

impl<K: Eq + Hash> Drop for Loading<'_, K> {
    fn drop(&mut self) {
        lock(self.loading).remove(self.key);
    }
}

fn lock<K>(loading: &Mutex<HashMap<K, u32>>) -> MutexGuard<'_, HashMap<K, u32>> {
    loading.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K, V> fmt::Debug for CacheAsideLoader<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheAsideLoader")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
