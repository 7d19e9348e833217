use crate::domain::FetcherConfig;
use crate::events::{EventSink, FetchFailedEvent, FetchedEvent, KeyEvent, LookupEvent};
use crate::fetch::flight::{Claim, FlightGuard, FlightWaiter, InFlightTable};
use crate::fetch::{CacheOperations, source_failure};
use crate::ports::{BackingSource, TtlStore};
use crate::stats::{Counter, FetchStats, StatsSnapshot};
use async_trait::async_trait;
use shared::config::StalePolicy;
use shared::{Error, Result};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Single-flight read-through cache.
///
/// Hits are served straight from the store without touching any coordination
/// state. On a miss the first caller registers an in-flight marker for the key and
/// starts the fetch on its own task; everyone else who misses the same key attaches
/// to that marker and receives the same value or the same error. Unrelated keys
/// never contend with each other.
///
/// Must be used from within a tokio runtime.
pub struct CoalescingFetcher<K, V>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    store: Arc<dyn TtlStore<K, V>>,
    source: Arc<dyn BackingSource<K, V>>,
    flights: Arc<InFlightTable<K, V>>,
    config: FetcherConfig,
    stats: Arc<FetchStats>,
    events: EventSink,
}

impl<K, V> CoalescingFetcher<K, V>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn TtlStore<K, V>>, source: Arc<dyn BackingSource<K, V>>) -> Self {
        Self::with_config(store, source, FetcherConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn TtlStore<K, V>>,
        source: Arc<dyn BackingSource<K, V>>,
        config: FetcherConfig,
    ) -> Self {
        Self {
            store,
            source,
            flights: Arc::new(InFlightTable::new()),
            config,
            stats: Arc::new(FetchStats::new()),
            events: EventSink::default(),
        }
    }

    pub fn with_event_broadcaster(mut self, broadcaster: broadcast::Sender<LookupEvent>) -> Self {
        self.events = EventSink::new(broadcaster);
        self
    }

    /// Number of keys with a fetch currently running.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.flights.is_in_flight(key)
    }

    fn start_fetch(&self, guard: FlightGuard<K, V>, ttl: Duration) {
        let job = FetchJob {
            store: Arc::clone(&self.store),
            source: Arc::clone(&self.source),
            stats: Arc::clone(&self.stats),
            events: self.events.clone(),
            ttl,
        };
        // Detached so that no caller's cancellation or timeout can abort the fetch.
        tokio::spawn(job.run(guard));
    }

    async fn await_flight(&self, key: &K, waiter: FlightWaiter<V>) -> Result<V> {
        let stale = match self.config.stale_policy {
            StalePolicy::ServeStale => self.store.get_stale(key).await,
            StalePolicy::Wait => None,
        };
        if let Some(stale) = stale {
            debug!("Serving stale value for key {:?} while refresh runs", key);
            self.stats.record(Counter::StaleServed);
            self.events.emit(LookupEvent::StaleServed(KeyEvent::new(key)));
            return Ok(stale);
        }

        let limit = match self.config.wait_timeout {
            Some(limit) if !limit.is_zero() => limit,
            _ => return waiter.wait().await,
        };
        match tokio::time::timeout(limit, waiter.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Timed out after {:?} waiting on fetch for key {:?}", limit, key);
                self.stats.record(Counter::Timeout);
                Err(Error::WaitTimeout(limit))
            }
        }
    }
}

#[async_trait]
impl<K, V> CacheOperations<K, V> for CoalescingFetcher<K, V>
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

        debug!("Cache miss for key {:?}", key);
        self.stats.record(Counter::Miss);
        self.events.emit(LookupEvent::Miss(KeyEvent::new(key)));

        let waiter = match self.flights.claim(key) {
            Claim::Owner(guard) => {
                let waiter = guard.waiter();
                self.start_fetch(guard, ttl);
                waiter
            }
            Claim::Waiter(waiter) => {
                debug!("Joining in-flight fetch for key {:?}", key);
                self.stats.record(Counter::Coalesced);
                self.events.emit(LookupEvent::Coalesced(KeyEvent::new(key)));
                waiter
            }
        };

        self.await_flight(key, waiter).await
    }

    fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn variant(&self) -> &'static str {
        "coalescing"
    }
}

/// Everything the detached fetch task needs, cloned out of the fetcher.
struct FetchJob<K, V> {
    store: Arc<dyn TtlStore<K, V>>,
    source: Arc<dyn BackingSource<K, V>>,
    stats: Arc<FetchStats>,
    events: EventSink,
    ttl: Duration,
}

impl<K, V> FetchJob<K, V>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn run(self, guard: FlightGuard<K, V>) {
        let key = guard.key().clone();

        // A previous owner may have refilled the store between our miss and our claim.
        if let Some(value) = self.store.get(&key).await {
            debug!("Cache hit after claim for key {:?}", key);
            self.stats.record(Counter::HitAfterWait);
            self.events.emit(LookupEvent::HitAfterWait(KeyEvent::new(&key)));
            guard.publish(Ok(value));
            return;
        }

        self.stats.record(Counter::Fetch);
        let started = Instant::now();
        let outcome = match self.source.fetch(&key).await {
            Ok(value) => {
                self.store.set(key.clone(), value.clone(), self.ttl).await;
                info!("Fetched key {:?} in {:?}", key, started.elapsed());
                self.events.emit(LookupEvent::Fetched(FetchedEvent::new(
                    &key,
                    self.ttl,
                    started.elapsed(),
                )));
                Ok(value)
            }
            Err(err) => {
                warn!("Backing source failed for key {:?}: {}", key, err);
                self.stats.record(Counter::Failure);
                self.events
                    .emit(LookupEvent::FetchFailed(FetchFailedEvent::new(&key, err.to_string())));
                Err(source_failure(&key, err))
            }
        };

        guard.publish(outcome);
    }
}
