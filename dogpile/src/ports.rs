use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shared::config::Config;

// Ports are the pluggable edges of the cache: where values live and where they come from.

/// Error type a backing source may fail with.
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// Thread-safe key/value storage with per-entry expiry.
#[async_trait]
pub trait TtlStore<K, V>: Send + Sync + 'static {
    /// The value for `key` if present and not yet expired.
    async fn get(&self, key: &K) -> Option<V>;

    /// The value for `key` even if it has expired, as long as the store still retains it.
    async fn get_stale(&self, key: &K) -> Option<V>;

    /// Unconditionally replaces any entry for `key`; the new entry expires after `ttl`.
    async fn set(&self, key: K, value: V, ttl: Duration);
}

/// The origin data store behind the cache. Slow, fallible and uncached.
#[async_trait]
pub trait BackingSource<K, V>: Send + Sync + 'static {
    async fn fetch(&self, key: &K) -> Result<V, SourceError>;
}

/// Port for creating stores from configuration.
pub trait StoreFactory<K, V>: Send + Sync + 'static {
    fn create_from_config(&self, config: &Config) -> Arc<dyn TtlStore<K, V>>;
}
