use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Counter {
    Hit,
    HitAfterWait,
    Miss,
    Fetch,
    Coalesced,
    StaleServed,
    Failure,
    Timeout,
}

/// Lookup counters shared by a fetcher and the fetch tasks it spawns.
#[derive(Debug, Default)]
pub struct FetchStats {
    hits: AtomicU64,
    hits_after_wait: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    coalesced: AtomicU64,
    stale_served: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
}

impl FetchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, counter: Counter) {
        self.slot(counter).fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.slot(counter).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.get(Counter::Hit),
            hits_after_wait: self.get(Counter::HitAfterWait),
            misses: self.get(Counter::Miss),
            fetches: self.get(Counter::Fetch),
            coalesced: self.get(Counter::Coalesced),
            stale_served: self.get(Counter::StaleServed),
            failures: self.get(Counter::Failure),
            timeouts: self.get(Counter::Timeout),
        }
    }

    fn slot(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Hit => &self.hits,
            Counter::HitAfterWait => &self.hits_after_wait,
            Counter::Miss => &self.misses,
            Counter::Fetch => &self.fetches,
            Counter::Coalesced => &self.coalesced,
            Counter::StaleServed => &self.stale_served,
            Counter::Failure => &self.failures,
            Counter::Timeout => &self.timeouts,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub hits_after_wait: u64,
    pub misses: u64,
    pub fetches: u64,
    pub coalesced: u64,
    pub stale_served: u64,
    pub failures: u64,
    pub timeouts: u64,
}
