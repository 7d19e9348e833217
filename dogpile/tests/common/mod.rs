#![allow(dead_code)]

use async_trait::async_trait;
use dogpile::{BackingSource, CacheOperations, Result, SourceError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Barrier;
use tokio::task::JoinSet;

/// Slow source that counts calls and stamps each value with the call number.
pub struct CountingSource {
    calls: AtomicUsize,
    latency: Duration,
    failing: AtomicBool,
    panicking: AtomicBool,
}

impl CountingSource {
    pub fn new(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            latency,
            failing: AtomicBool::new(false),
            panicking: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_panicking(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackingSource<String, String> for CountingSource {
    async fn fetch(&self, key: &String) -> std::result::Result<String, SourceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.latency).await;
        if self.panicking.load(Ordering::SeqCst) {
            panic!("source blew up fetching {key}");
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err("database unavailable".into());
        }
        Ok(format!("{key}-v{call}"))
    }
}

/// Fires `n` lookups for `key` released together by a barrier.
pub async fn stampede(
    ops: Arc<dyn CacheOperations<String, String>>,
    key: &str,
    n: usize,
    ttl: Duration,
) -> Vec<Result<String>> {
    let barrier = Arc::new(Barrier::new(n));
    let mut tasks = JoinSet::new();
    for _ in 0..n {
        let ops = Arc::clone(&ops);
        let barrier = Arc::clone(&barrier);
        let key = key.to_string();
        tasks.spawn(async move {
            barrier.wait().await;
            ops.get_with_ttl(&key, ttl).await
        });
    }

    let mut outcomes = Vec::with_capacity(n);
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined.expect("requester panicked"));
    }
    outcomes
}
