use async_trait::async_trait;
use dogpile::domain::CacheEntry;
use dogpile::ports::TtlStore;
use moka::Expiry;
use moka::future::Cache;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Moka-backed TTL store.
///
/// Validity is decided lazily on read from each entry's own deadline, so per-entry
/// TTLs work. Moka reclaims the memory once an entry is `stale_retention` past
/// its deadline; until then `get_stale` can still serve it.
pub struct MokaTtlStore<K, V>
where
    K: Debug + Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    cache: Cache<K, CacheEntry<V>>,
    stale_retention: Duration,
}

/// Evicts an entry `stale_retention` after its own deadline.
struct RetainPastDeadline {
    stale_retention: Duration,
}

impl RetainPastDeadline {
    fn lifetime<V>(&self, entry: &CacheEntry<V>, from: Instant) -> Option<Duration> {
        Some(
            entry
                .expires_at()
                .saturating_duration_since(from)
                .saturating_add(self.stale_retention),
        )
    }
}

impl<K, V> Expiry<K, CacheEntry<V>> for RetainPastDeadline {
    fn expire_after_create(
        &self,
        _key: &K,
        entry: &CacheEntry<V>,
        created_at: Instant,
    ) -> Option<Duration> {
        self.lifetime(entry, created_at)
    }

    fn expire_after_update(
        &self,
        _key: &K,
        entry: &CacheEntry<V>,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        self.lifetime(entry, updated_at)
    }
}

impl<K, V> MokaTtlStore<K, V>
where
    K: Debug + Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &str, stale_retention: Duration) -> Self {
        let cache = Cache::builder()
            .name(name)
            .expire_after(RetainPastDeadline { stale_retention })
            .build();

        Self {
            cache,
            stale_retention,
        }
    }

    pub fn stale_retention(&self) -> Duration {
        self.stale_retention
    }

    /// Entries moka still holds, after flushing its pending maintenance.
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

#[async_trait]
impl<K, V> TtlStore<K, V> for MokaTtlStore<K, V>
where
    K: Debug + Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Option<V> {
        self.cache
            .get(key)
            .await
            .filter(CacheEntry::is_valid)
            .map(CacheEntry::into_value)
    }

    async fn get_stale(&self, key: &K) -> Option<V> {
        self.cache.get(key).await.map(CacheEntry::into_value)
    }

    async fn set(&self, key: K, value: V, ttl: Duration) {
        self.cache.insert(key, CacheEntry::new(value, ttl)).await;
    }
}

impl<K, V> Debug for MokaTtlStore<K, V>
where
    K: Debug + Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaTtlStore")
            .field("entry_count", &self.cache.entry_count())
            .field("stale_retention", &self.stale_retention)
            .finish()
    }
}
