use async_trait::async_trait;
use dashmap::DashMap;
use dogpile::domain::CacheEntry;
use dogpile::ports::TtlStore;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Sharded in-memory TTL store.
///
/// Each operation locks only the dashmap shard that owns the key. Expired entries
/// stay in the map until they are overwritten or `purge_expired` is called, which
/// is what lets `get_stale` serve them. Nothing purges on its own: an owner with a
/// churning key space must call `purge_expired` periodically or dead keys pile up.
pub struct MemoryTtlStore<K, V>
where
    K: Debug + Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    entries: DashMap<K, CacheEntry<V>>,
}

impl<K, V> MemoryTtlStore<K, V>
where
    K: Debug + Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Entries held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired entry and returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.is_valid_at(now);
            if !keep {
                purged += 1;
            }
            keep
        });
        if purged > 0 {
            tracing::debug!("Purged {} expired entries", purged);
        }
        purged
    }
}

impl<K, V> Default for MemoryTtlStore<K, V>
where
    K: Debug + Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> TtlStore<K, V> for MemoryTtlStore<K, V>
where
    K: Debug + Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Option<V> {
        let guard = self.entries.get(key)?;
        let entry: &CacheEntry<V> = &guard;
        entry.is_valid().then(|| entry.value().clone())
    }

    async fn get_stale(&self, key: &K) -> Option<V> {
        let guard = self.entries.get(key)?;
        let entry: &CacheEntry<V> = &guard;
        Some(entry.value().clone())
    }

    async fn set(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(key, CacheEntry::new(value, ttl));
    }
}

impl<K, V> Debug for MemoryTtlStore<K, V>
where
    K: Debug + Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTtlStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_memory_store_set_and_get() {
        let store = MemoryTtlStore::new();

        store.set("hello", "world", Duration::from_secs(5)).await;

        assert_eq!(store.get(&"hello").await, Some("world"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_get_nonexistent() {
        let store: MemoryTtlStore<&str, &str> = MemoryTtlStore::new();
        assert_eq!(store.get(&"nonexistent").await, None);
        assert_eq!(store.get_stale(&"nonexistent").await, None);
    }

    #[tokio::test]
    async fn test_memory_store_expiry() {
        let store = MemoryTtlStore::new();

        store.set("ttl_key", "ttl_value", Duration::from_millis(100)).await;
        assert_eq!(store.get(&"ttl_key").await, Some("ttl_value"));

        sleep(Duration::from_millis(150)).await;

        // Expired entries read as absent but are still retained for stale reads
        assert_eq!(store.get(&"ttl_key").await, None);
        assert_eq!(store.get_stale(&"ttl_key").await, Some("ttl_value"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_overwrite_replaces_unexpired_entry() {
        let store = MemoryTtlStore::new();

        store.set("key", "value1", Duration::from_secs(60)).await;
        store.set("key", "value2", Duration::from_secs(60)).await;

        assert_eq!(store.get(&"key").await, Some("value2"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_overwrite_resets_ttl() {
        let store = MemoryTtlStore::new();

        store.set("key", "short", Duration::from_millis(50)).await;
        store.set("key", "long", Duration::from_secs(60)).await;
        sleep(Duration::from_millis(100)).await;

        assert_eq!(store.get(&"key").await, Some("long"));
    }

    #[tokio::test]
    async fn test_memory_store_purge_expired() {
        let store = MemoryTtlStore::new();

        store.set("old", "a", Duration::from_millis(10)).await;
        store.set("fresh", "b", Duration::from_secs(60)).await;
        sleep(Duration::from_millis(50)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_stale(&"old").await, None);
        assert_eq!(store.get(&"fresh").await, Some("b"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_memory_store_concurrent_writers() {
        let store = Arc::new(MemoryTtlStore::new());
        let mut handles = Vec::new();

        for i in 0..64u32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.set(i % 8, i, Duration::from_secs(60)).await;
                store.get(&(i % 8)).await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }
        assert_eq!(store.len(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_memory_store_purge_counts_only_removed_entries() {
        let store = Arc::new(MemoryTtlStore::new());
        for i in 0..100u32 {
            store.set(i, i, Duration::from_millis(10)).await;
        }
        sleep(Duration::from_millis(50)).await;

        // Fresh keys land while the purge runs and must not skew its count.
        let writer = tokio::spawn({
            let store = Arc::clone(&store);
            async move {
                for i in 1000..1500u32 {
                    store.set(i, i, Duration::from_secs(60)).await;
                }
            }
        });
        let purged = store.purge_expired();
        writer.await.unwrap();

        assert_eq!(purged, 100);
        assert_eq!(store.len(), 500);
        assert_eq!(store.purge_expired(), 0);
    }
}
