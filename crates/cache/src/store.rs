//! The key-value store a [`CacheAsideLoader`](crate::loader::CacheAsideLoader)
//! reads from and populates.
//!
//! Real deployments plug in their own backend; the store is expected to be
//! internally thread-safe. [`MemoryStore`] is the in-process implementation.

use std::collections::HashMap;
use std::hash::Hash;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Errors reported by a [`Store`] backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Cache store unavailable: {0}")]
    Unavailable(String),

    #[error("Cache store error: {0}")]
    Backend(String),
}

/// Abstract cache backend. Entries have no TTL; they live until deleted or
/// cleared.
#[async_trait]
pub trait Store<K, V>: Send + Sync {
    async fn get(&self, key: &K) -> Result<Option<V>, StoreError>;

    /// Insert or overwrite `key`.
    async fn set(&self, key: K, value: V) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &K) -> Result<(), StoreError>;

    /// Remove every entry.
    async fn clear(&self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// `HashMap` behind an async `RwLock`.
pub struct MemoryStore<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> MemoryStore<K, V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of cached entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl<K, V> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> Store<K, V> for MemoryStore<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    async fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: K, value: V) -> Result<(), StoreError> {
        self.entries.write().await.insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &K) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.entries.write().await.clear();
        Ok(())
    }
}
