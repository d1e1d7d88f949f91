//! Process-wide, identity-keyed instance cache.
//!
//! Connections to the coordination store and log-source clients are
//! expensive. They are cached by their full identity (endpoint plus timeouts,
//! or endpoint plus credentials) and shared by every caller in the process.
//!
//! Lookup and initialization happen under one lock, so two callers racing on
//! the same missing key never both establish a connection. Once an instance
//! is cached, callers hold their own `Arc` and use it without the lock.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::Mutex;

/// Lazily-initialized map from identity to shared instance.
pub struct InstanceCache<K, V: ?Sized> {
    entries: Mutex<HashMap<K, Arc<V>>>,
}

impl<K, V> InstanceCache<K, V>
where
    K: Eq + Hash + Clone,
    V: ?Sized,
{
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached instance for `key`, creating it with `init` if absent.
    ///
    /// The check, the creation and the insert run under a single lock. A failed
    /// `init` leaves the key absent so the next caller retries.
    ///
    /// # Errors
    ///
    /// Returns whatever error `init` returns.
    pub async fn get_or_try_init<F, Fut, E>(&self, key: &K, init: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<V>, E>>,
    {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(key) {
            return Ok(Arc::clone(existing));
        }

        let created = init().await?;
        entries.insert(key.clone(), Arc::clone(&created));
        Ok(created)
    }

    /// Returns the cached instance for `key`, if any.
    pub async fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.lock().await.get(key).cloned()
    }

    /// Removes and returns the cached instance for `key`.
    ///
    /// The next `get_or_try_init` for the same key creates a fresh instance.
    pub async fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.entries.lock().await.remove(key)
    }

    /// Removes every instance whose key fails `keep`, returning the removed ones.
    pub async fn retain<F>(&self, mut keep: F) -> Vec<Arc<V>>
    where
        F: FnMut(&K) -> bool,
    {
        let mut entries = self.entries.lock().await;
        let doomed: Vec<K> = entries.keys().filter(|k| !keep(k)).cloned().collect();
        doomed
            .iter()
            .filter_map(|key| entries.remove(key))
            .collect()
    }

    /// Removes every cached instance, returning them for teardown.
    pub async fn drain(&self) -> Vec<Arc<V>> {
        self.entries.lock().await.drain().map(|(_, v)| v).collect()
    }

    /// Returns the number of cached instances.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Returns true if nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl<K, V> Default for InstanceCache<K, V>
where
    K: Eq + Hash + Clone,
    V: ?Sized,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_init_runs_once_per_key() {
        let cache: InstanceCache<String, u32> = InstanceCache::new();
        let inits = AtomicU32::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_try_init(&"a".to_string(), || async {
                    inits.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(Arc::new(7))
                })
                .await
                .unwrap();
            assert_eq!(*value, 7);
        }

        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_init_is_serialized() {
        let cache: Arc<InstanceCache<u32, u32>> = Arc::new(InstanceCache::new());
        let inits = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let inits = Arc::clone(&inits);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_try_init(&1, || async {
                        inits.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Ok::<_, ()>(Arc::new(99))
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(*handle.await.unwrap(), 99);
        }

        assert_eq!(inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_init_is_not_cached() {
        let cache: InstanceCache<u32, u32> = InstanceCache::new();

        let result = cache
            .get_or_try_init(&1, || async { Err::<Arc<u32>, _>("down") })
            .await;
        assert_eq!(result.unwrap_err(), "down");
        assert!(cache.is_empty().await);

        let value = cache
            .get_or_try_init(&1, || async { Ok::<_, &str>(Arc::new(5)) })
            .await
            .unwrap();
        assert_eq!(*value, 5);
    }

    #[tokio::test]
    async fn test_remove_forces_reinit() {
        let cache: InstanceCache<u32, u32> = InstanceCache::new();
        cache
            .get_or_try_init(&1, || async { Ok::<_, ()>(Arc::new(1)) })
            .await
            .unwrap();

        assert!(cache.remove(&1).await.is_some());
        assert!(cache.get(&1).await.is_none());

        let value = cache
            .get_or_try_init(&1, || async { Ok::<_, ()>(Arc::new(2)) })
            .await
            .unwrap();
        assert_eq!(*value, 2);
    }
}
