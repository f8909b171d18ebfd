//! Keyed async lock maps.
//!
//! Concurrency in the engine is scoped per entity: one lock per upload
//! session, one per owner. Locks for distinct keys never contend; there is
//! no global lock anywhere on a hot path.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of per-key async mutexes.
///
/// The outer std mutex guards only the map itself and is held for a few
/// instructions; the per-key tokio mutexes are what callers actually hold
/// across awaits.
pub struct LockMap<K> {
    inner: StdMutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> LockMap<K> {
    /// Create an empty lock map.
    pub fn new() -> Self {
        Self {
            inner: StdMutex::new(HashMap::new()),
        }
    }

    /// Acquire the lock for `key`, creating it on first use.
    pub async fn acquire(&self, key: &K) -> OwnedMutexGuard<()> {
        let handle = {
            let mut map = self.inner.lock().expect("lock map poisoned");
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        handle.lock_owned().await
    }

    /// Drop the entry for `key` if nobody holds or awaits it.
    ///
    /// Called after an entity is destroyed so the map does not grow without
    /// bound. Racing acquirers keep their own Arc, so removal is safe.
    pub fn release(&self, key: &K) {
        let mut map = self.inner.lock().expect("lock map poisoned");
        if let Some(handle) = map.get(key) {
            if Arc::strong_count(handle) == 1 {
                map.remove(key);
            }
        }
    }

    /// Number of live entries, for diagnostics.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock map poisoned").len()
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone> Default for LockMap<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let locks = Arc::new(LockMap::new());
        let _a = locks.acquire(&"a").await;
        // A second key acquires immediately even while "a" is held.
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&"b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = Arc::new(LockMap::new());
        let guard = locks.acquire(&"k").await;
        let pending = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(&"k").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());
        drop(guard);
        pending.await.unwrap();
    }

    #[tokio::test]
    async fn release_prunes_idle_entries() {
        let locks = LockMap::new();
        {
            let _g = locks.acquire(&1u32).await;
            locks.release(&1); // held: must not be pruned
            assert_eq!(locks.len(), 1);
        }
        locks.release(&1);
        assert!(locks.is_empty());
    }
}
