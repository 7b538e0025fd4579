//! Coalescing of concurrent duplicate work.
//!
//! A [`Group`] admits one leader per key. Callers arriving while the leader
//! runs park on a `watch` channel and receive a clone of the leader's result.
//! If the leader is cancelled before producing a result, parked callers wake
//! up and race to become the next leader.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

/// One in-flight call per key at a time.
pub struct Group<K, T> {
    calls: Mutex<HashMap<K, watch::Receiver<Option<T>>>>,
}

impl<K, T> Group<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` for `key`, or wait for and share the result of the call
    /// already in flight for it.
    pub async fn work<F, Fut>(&self, key: K, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let leader = loop {
            let mut follower = {
                let mut calls = self.lock();
                match calls.get(&key) {
                    Some(receiver) => receiver.clone(),
                    None => {
                        let (sender, receiver) = watch::channel(None);
                        calls.insert(key.clone(), receiver);
                        break sender;
                    }
                }
            };

            let shared = follower
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|result| result.clone());
            if let Some(value) = shared {
                return value;
            }
            // Leader went away without a result; try to take over.
        };

        let _flight = Flight { group: self, key: &key };
        let value = work().await;
        leader.send_replace(Some(value.clone()));
        value
    }

    /// Number of keys with a call in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, watch::Receiver<Option<T>>>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, T> Default for Group<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the leader's entry when the call finishes or is dropped.
struct Flight<'a, K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    group: &'a Group<K, T>,
    key: &'a K,
}

impl<K, T> Drop for Flight<'_, K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    fn drop(&mut self) {
        self.group.lock().remove(self.key);
    }
}
