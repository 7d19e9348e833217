use crate::domain::DEFAULT_TTL;
use crate::events::{EventSink, FetchFailedEvent, FetchedEvent, KeyEvent, LookupEvent};
use crate::fetch::{CacheOperations, source_failure};
use crate::ports::{BackingSource, TtlStore};
use crate::stats::{Counter, FetchStats, StatsSnapshot};
use async_trait::async_trait;
use shared::Result;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

/// Double-checked locking behind one mutex per fetcher.
///
/// Correct for a single key, but a slow fetch for one key holds up misses on every
/// other key. A failed fetch is reported only to the caller holding the lock; the
/// next caller in line re-checks the store and fetches again.
pub struct GlobalLockFetcher<K, V>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    store: Arc<dyn TtlStore<K, V>>,
    source: Arc<dyn BackingSource<K, V>>,
    lock: Mutex<()>,
    default_ttl: Duration,
    stats: FetchStats,
    events: EventSink,
}

impl<K, V> GlobalLockFetcher<K, V>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn TtlStore<K, V>>, source: Arc<dyn BackingSource<K, V>>) -> Self {
        Self {
            store,
            source,
            lock: Mutex::new(()),
            default_ttl: DEFAULT_TTL,
            stats: FetchStats::new(),
            events: EventSink::default(),
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_event_broadcaster(mut self, broadcaster: broadcast::Sender<LookupEvent>) -> Self {
        self.events = EventSink::new(broadcaster);
        self
    }
}

#[async_trait]
impl<K, V> CacheOperations<K, V> for GlobalLockFetcher<K, V>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get_with_ttl(&self, key: &K, ttl: Duration) -> Result<V> {
        if let Some(value) = self.store.get(key).await {
            debug!("Cache hit for key {:?}", key);
            self.stats.record(Counter::Hit);
            self.events.emit(LookupEvent::Hit(KeyEvent::new(key)));
            return Ok(value);
        }

        let _guard = self.lock.lock().await;

        if let Some(value) = self.store.get(key).await {
            debug!("Cache hit after lock for key {:?}", key);
            self.stats.record(Counter::HitAfterWait);
            self.events.emit(LookupEvent::HitAfterWait(KeyEvent::new(key)));
            return Ok(value);
        }

        debug!("Cache miss (locked) for key {:?}", key);
        self.stats.record(Counter::Miss);
        self.events.emit(LookupEvent::Miss(KeyEvent::new(key)));

        self.stats.record(Counter::Fetch);
        let started = Instant::now();
        match self.source.fetch(key).await {
            Ok(value) => {
                self.store.set(key.clone(), value.clone(), ttl).await;
                info!("Fetched key {:?} in {:?}", key, started.elapsed());
                self.events
                    .emit(LookupEvent::Fetched(FetchedEvent::new(key, ttl, started.elapsed())));
                Ok(value)
            }
            Err(err) => {
                warn!("Backing source failed for key {:?}: {}", key, err);
                self.stats.record(Counter::Failure);
                self.events
                    .emit(LookupEvent::FetchFailed(FetchFailedEvent::new(key, err.to_string())));
                Err(source_failure(key, err))
            }
        }
    }

    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn variant(&self) -> &'static str {
        "global_lock"
    }
}
