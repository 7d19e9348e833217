use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

/// One observable step of a lookup, broadcast to any attached subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LookupEvent {
    Hit(KeyEvent),
    /// The store was refilled by someone else while this lookup was coordinating.
    HitAfterWait(KeyEvent),
    Miss(KeyEvent),
    /// Attached to a fetch another caller already started.
    Coalesced(KeyEvent),
    StaleServed(KeyEvent),
    Fetched(FetchedEvent),
    FetchFailed(FetchFailedEvent),
}

impl LookupEvent {
    pub fn key(&self) -> &str {
        match self {
            LookupEvent::Hit(e)
            | LookupEvent::HitAfterWait(e)
            | LookupEvent::Miss(e)
            | LookupEvent::Coalesced(e)
            | LookupEvent::StaleServed(e) => &e.key,
            LookupEvent::Fetched(e) => &e.key,
            LookupEvent::FetchFailed(e) => &e.key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LookupEvent::Hit(_) => "hit",
            LookupEvent::HitAfterWait(_) => "hit_after_wait",
            LookupEvent::Miss(_) => "miss",
            LookupEvent::Coalesced(_) => "coalesced",
            LookupEvent::StaleServed(_) => "stale_served",
            LookupEvent::Fetched(_) => "fetched",
            LookupEvent::FetchFailed(_) => "fetch_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: String,
    pub timestamp: u64,
}

impl KeyEvent {
    pub fn new<K: Debug>(key: &K) -> Self {
        Self {
            key: format!("{key:?}"),
            timestamp: now_timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedEvent {
    pub key: String,
    pub ttl_ms: u64,
    pub elapsed_ms: u64,
    pub timestamp: u64,
}

impl FetchedEvent {
    pub fn new<K: Debug>(key: &K, ttl: Duration, elapsed: Duration) -> Self {
        Self {
            key: format!("{key:?}"),
            ttl_ms: ttl.as_millis() as u64,
            elapsed_ms: elapsed.as_millis() as u64,
            timestamp: now_timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailedEvent {
    pub key: String,
    pub reason: String,
    pub timestamp: u64,
}

impl FetchFailedEvent {
    pub fn new<K: Debug>(key: &K, reason: impl Into<String>) -> Self {
        Self {
            key: format!("{key:?}"),
            reason: reason.into(),
            timestamp: now_timestamp(),
        }
    }
}

/// Optional broadcast channel a fetcher reports into.
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    broadcaster: Option<broadcast::Sender<LookupEvent>>,
}

impl EventSink {
    pub fn new(broadcaster: broadcast::Sender<LookupEvent>) -> Self {
        Self {
            broadcaster: Some(broadcaster),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.broadcaster.is_some()
    }

    pub fn emit(&self, event: LookupEvent) {
        let Some(broadcaster) = &self.broadcaster else {
            return;
        };
        let kind = event.kind();
        match broadcaster.send(event) {
            Ok(subscriber_count) => {
                tracing::trace!("Broadcasted {} event to {} subscriber(s)", kind, subscriber_count);
            }
            Err(_) => {
                tracing::trace!("No subscribers for {} event", kind);
            }
        }
    }
}

/// Seconds since UNIX epoch
pub fn now_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
