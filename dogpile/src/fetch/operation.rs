use crate::stats::StatsSnapshot;
use async_trait::async_trait;
use shared::Result;
use std::time::Duration;

/// Read-through lookup shared by every fetcher variant.
///
/// A miss is never an error: the value is fetched from the backing source and
/// cached. Only a failed fetch (or an abandoned wait) reaches the caller as `Err`.
#[async_trait]
pub trait CacheOperations<K, V>: Send + Sync + 'static
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    /// Looks `key` up, fetching and caching it for `ttl` on a miss.
    async fn get_with_ttl(&self, key: &K, ttl: Duration) -> Result<V>;

    /// `get_with_ttl` with the fetcher's default TTL.
    async fn get(&self, key: &K) -> Result<V> {
        self.get_with_ttl(key, self.default_ttl()).await
    }

    fn default_ttl(&self) -> Duration;

    fn stats(&self) -> StatsSnapshot;

    /// Short label for logs and reports.
    fn variant(&self) -> &'static str;
}
