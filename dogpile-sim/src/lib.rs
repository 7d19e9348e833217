//! Before/after reproduction of a cache stampede.
//!
//! A product entry is preloaded with a short TTL, left to expire, and then hit by
//! a burst of concurrent requesters. The report records how many times the
//! database was actually queried.

use async_trait::async_trait;
use dogpile::{
    BackingSource, CacheOperations, CoalescingFetcher, FetcherConfig, GlobalLockFetcher,
    LookupEvent, SourceError, StatsSnapshot, TtlStore, UnguardedFetcher,
};
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

pub const PRODUCT_KEY: &str = "product";
pub const PRELOADED_VALUE: &str = "Hot product";
pub const PRODUCT_DATA: &str = "Hot product data";

/// Stand-in for the slow origin database.
pub struct ProductDatabase {
    latency: Duration,
    max_jitter: Duration,
    fetches: AtomicU64,
    failing: AtomicBool,
}

impl ProductDatabase {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            max_jitter: Duration::ZERO,
            fetches: AtomicU64::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Adds up to `max_jitter` of random extra latency to each fetch.
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackingSource<String, String> for ProductDatabase {
    async fn fetch(&self, key: &String) -> Result<String, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        info!("Fetching {} from database", key);

        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = Duration::from_millis(rand::rng().random_range(0..=jitter_ms));
        tokio::time::sleep(self.latency + jitter).await;

        if self.failing.load(Ordering::SeqCst) {
            return Err("database unavailable".into());
        }
        Ok(PRODUCT_DATA.to_string())
    }
}

/// Which fetcher guards the cache during a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Unguarded,
    GlobalLock,
    Coalescing,
}

impl Variant {
    pub const ALL: [Variant; 3] = [Variant::Unguarded, Variant::GlobalLock, Variant::Coalescing];

    pub fn build(
        self,
        store: Arc<dyn TtlStore<String, String>>,
        source: Arc<dyn BackingSource<String, String>>,
        config: FetcherConfig,
        events: Option<broadcast::Sender<LookupEvent>>,
    ) -> Arc<dyn CacheOperations<String, String>> {
        match self {
            Variant::Unguarded => {
                let fetcher =
                    UnguardedFetcher::new(store, source).with_default_ttl(config.default_ttl);
                match events {
                    Some(tx) => Arc::new(fetcher.with_event_broadcaster(tx)),
                    None => Arc::new(fetcher),
                }
            }
            Variant::GlobalLock => {
                let fetcher =
                    GlobalLockFetcher::new(store, source).with_default_ttl(config.default_ttl);
                match events {
                    Some(tx) => Arc::new(fetcher.with_event_broadcaster(tx)),
                    None => Arc::new(fetcher),
                }
            }
            Variant::Coalescing => {
                let fetcher = CoalescingFetcher::with_config(store, source, config);
                match events {
                    Some(tx) => Arc::new(fetcher.with_event_broadcaster(tx)),
                    None => Arc::new(fetcher),
                }
            }
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Variant::Unguarded => "unguarded",
            Variant::GlobalLock => "global lock",
            Variant::Coalescing => "coalescing",
        };
        f.write_str(label)
    }
}

/// Timing of one simulated burst.
#[derive(Clone, Debug)]
pub struct SimulationPlan {
    pub requesters: usize,
    /// TTL of the preloaded entry.
    pub preload_ttl: Duration,
    /// How long to wait after preloading before the burst; longer than `preload_ttl`.
    pub expiry_wait: Duration,
}

impl Default for SimulationPlan {
    fn default() -> Self {
        Self {
            requesters: 10,
            preload_ttl: Duration::from_secs(1),
            expiry_wait: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BreakdownReport {
    pub variant: &'static str,
    pub requesters: usize,
    pub database_fetches: u64,
    pub succeeded: usize,
    pub failed: usize,
    pub distinct_values: Vec<String>,
    pub elapsed_ms: u64,
    pub stats: StatsSnapshot,
}

impl BreakdownReport {
    pub fn print_summary(&self) {
        println!("\n=== {} ===", self.variant);
        println!("Requesters:        {}", self.requesters);
        println!("Database fetches:  {}", self.database_fetches);
        println!("Succeeded:         {}", self.succeeded);
        println!("Failed:            {}", self.failed);
        println!("Distinct values:   {:?}", self.distinct_values);
        println!("Burst duration:    {} ms", self.elapsed_ms);
    }
}

/// Preloads the product, lets it expire, then fires `plan.requesters` concurrent lookups.
pub async fn simulate_breakdown(
    ops: Arc<dyn CacheOperations<String, String>>,
    store: Arc<dyn TtlStore<String, String>>,
    database: Arc<ProductDatabase>,
    plan: &SimulationPlan,
) -> BreakdownReport {
    store
        .set(PRODUCT_KEY.to_string(), PRELOADED_VALUE.to_string(), plan.preload_ttl)
        .await;
    tokio::time::sleep(plan.expiry_wait).await;

    let fetches_before = database.fetch_count();
    let started = Instant::now();
    let mut requesters = JoinSet::new();
    for _ in 0..plan.requesters {
        let ops = Arc::clone(&ops);
        requesters.spawn(async move {
            let key = PRODUCT_KEY.to_string();
            ops.get(&key).await
        });
    }

    let mut succeeded = 0;
    let mut failed = 0;
    let mut values = BTreeSet::new();
    while let Some(joined) = requesters.join_next().await {
        match joined {
            Ok(Ok(value)) => {
                succeeded += 1;
                values.insert(value);
            }
            Ok(Err(err)) => {
                warn!("Requester failed: {}", err);
                failed += 1;
            }
            Err(err) => {
                warn!("Requester task died: {}", err);
                failed += 1;
            }
        }
    }

    BreakdownReport {
        variant: ops.variant(),
        requesters: plan.requesters,
        database_fetches: database.fetch_count() - fetches_before,
        succeeded,
        failed,
        distinct_values: values.into_iter().collect(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        stats: ops.stats(),
    }
}
