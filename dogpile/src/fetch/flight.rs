//! Per-key table of fetches currently in progress.
//!
//! Each in-flight key owns a `watch` channel whose value starts as `None` and is
//! set exactly once to the fetch outcome. Waiters subscribe and block until the
//! slot is filled; if the owning fetch dies without publishing, the sender is
//! dropped and every waiter is released with `Error::FetchAbandoned`.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use shared::{Error, Result};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

type Slot<V> = Option<Result<V>>;

struct Flight<V> {
    id: u64,
    tx: watch::Sender<Slot<V>>,
}

/// Outcome of claiming a key.
pub enum Claim<K, V>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// No fetch was running; the caller now owns one and must publish through the guard.
    Owner(FlightGuard<K, V>),
    /// A fetch is already running for the key.
    Waiter(FlightWaiter<V>),
}

pub struct InFlightTable<K, V>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    flights: DashMap<K, Flight<V>>,
    next_id: AtomicU64,
}

impl<K, V> InFlightTable<K, V>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Joins the fetch in flight for `key`, or registers a new one owned by the caller.
    ///
    /// The decision is made under the shard lock for `key`, so two callers can never
    /// both become owner of the same key at the same time.
    pub fn claim(self: &Arc<Self>, key: &K) -> Claim<K, V> {
        match self.flights.entry(key.clone()) {
            Entry::Occupied(entry) => Claim::Waiter(FlightWaiter {
                key: format!("{key:?}"),
                rx: entry.get().tx.subscribe(),
            }),
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                entry.insert(Flight { id, tx });
                Claim::Owner(FlightGuard {
                    table: Arc::clone(self),
                    key: key.clone(),
                    id,
                    rx,
                    published: false,
                })
            }
        }
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.flights.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }

    // Identity-checked so a finished flight never removes a newer one for the same key.
    fn finish(&self, key: &K, id: u64) -> Option<watch::Sender<Slot<V>>> {
        self.flights
            .remove_if(key, |_, flight| flight.id == id)
            .map(|(_, flight)| flight.tx)
    }
}

impl<K, V> Default for InFlightTable<K, V>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Ownership of one in-flight fetch. Dropping it without publishing unregisters
/// the flight and releases all waiters with an error.
pub struct FlightGuard<K, V>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    table: Arc<InFlightTable<K, V>>,
    key: K,
    id: u64,
    rx: watch::Receiver<Slot<V>>,
    published: bool,
}

impl<K, V> FlightGuard<K, V>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    /// A waiter on this guard's own flight.
    pub fn waiter(&self) -> FlightWaiter<V> {
        FlightWaiter {
            key: format!("{:?}", self.key),
            rx: self.rx.clone(),
        }
    }

    /// Unregisters the flight, then hands `result` to every waiter.
    ///
    /// Callers must write a successful value to the store before publishing: once
    /// the marker is gone, newcomers rely on the store to see it.
    pub fn publish(mut self, result: Result<V>) {
        self.published = true;
        if let Some(tx) = self.table.finish(&self.key, self.id) {
            tx.send_replace(Some(result));
        }
    }
}

impl<K, V> Drop for FlightGuard<K, V>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if !self.published {
            tracing::warn!("In-flight fetch for key {:?} dropped without a result", self.key);
            // Dropping the sender closes the channel for every waiter.
            drop(self.table.finish(&self.key, self.id));
        }
    }
}

/// A subscription to someone else's (or one's own) in-flight fetch.
pub struct FlightWaiter<V> {
    key: String,
    rx: watch::Receiver<Slot<V>>,
}

impl<V> FlightWaiter<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Resolves with the published outcome, identical for every waiter.
    pub async fn wait(mut self) -> Result<V> {
        let abandoned = || Error::FetchAbandoned(self.key.clone());
        let slot = self.rx.wait_for(Option::is_some).await.map_err(|_| abandoned())?;
        let outcome = (*slot).clone();
        outcome.unwrap_or_else(|| Err(abandoned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn table() -> Arc<InFlightTable<String, String>> {
        Arc::new(InFlightTable::new())
    }

    fn expect_owner(claim: Claim<String, String>) -> FlightGuard<String, String> {
        match claim {
            Claim::Owner(guard) => guard,
            Claim::Waiter(_) => panic!("expected to own the flight"),
        }
    }

    fn expect_waiter(claim: Claim<String, String>) -> FlightWaiter<String> {
        match claim {
            Claim::Waiter(waiter) => waiter,
            Claim::Owner(_) => panic!("expected to join an existing flight"),
        }
    }

    #[tokio::test]
    async fn test_first_claim_owns_second_waits() {
        let table = table();
        let key = "product".to_string();

        let guard = expect_owner(table.claim(&key));
        let waiter = expect_waiter(table.claim(&key));
        assert!(table.is_in_flight(&key));
        assert_eq!(table.len(), 1);

        guard.publish(Ok("fresh".to_string()));
        assert_eq!(waiter.wait().await.unwrap(), "fresh");
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_unrelated_keys_get_separate_flights() {
        let table = table();
        let _a = expect_owner(table.claim(&"a".to_string()));
        let _b = expect_owner(table.claim(&"b".to_string()));
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let table = table();
        let key = "product".to_string();
        let guard = expect_owner(table.claim(&key));
        let waiters: Vec<_> = (0..5).map(|_| expect_waiter(table.claim(&key))).collect();

        let failure = Error::BackingSourceFailure {
            key: "\"product\"".into(),
            reason: "db down".into(),
        };
        guard.publish(Err(failure.clone()));

        for waiter in waiters {
            assert_eq!(waiter.wait().await.unwrap_err(), failure);
        }
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_waiters() {
        let table = table();
        let key = "product".to_string();
        let guard = expect_owner(table.claim(&key));
        let waiter = expect_waiter(table.claim(&key));

        drop(guard);

        let err = waiter.wait().await.unwrap_err();
        assert!(matches!(err, Error::FetchAbandoned(_)));
        assert!(!table.is_in_flight(&key));
    }

    #[tokio::test]
    async fn test_guard_waiter_sees_own_result() {
        let table = table();
        let guard = expect_owner(table.claim(&"k".to_string()));
        let own = guard.waiter();
        let handle = tokio::spawn(own.wait());

        tokio::time::sleep(Duration::from_millis(10)).await;
        guard.publish(Ok("v".to_string()));
        assert_eq!(handle.await.unwrap().unwrap(), "v");
    }

    #[tokio::test]
    async fn test_stale_guard_does_not_remove_newer_flight() {
        let table = table();
        let key = "k".to_string();

        // Forge an older guard for the same key after the real flight is registered.
        let current = expect_owner(table.claim(&key));
        let stale = FlightGuard {
            table: Arc::clone(&table),
            key: key.clone(),
            id: current.id.wrapping_add(1000),
            rx: current.rx.clone(),
            published: false,
        };
        stale.publish(Ok("old".to_string()));
        assert!(table.is_in_flight(&key));

        let waiter = expect_waiter(table.claim(&key));
        current.publish(Ok("new".to_string()));
        assert_eq!(waiter.wait().await.unwrap(), "new");
    }
}
