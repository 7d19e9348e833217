use std::time::{Duration, Instant};

use shared::config::{Config, StalePolicy};

/// TTL applied when the caller does not pass one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(Config::DEFAULT_TTL_SECS);

// Instant + Duration panics on overflow; absurd TTLs are clamped to this.
const MAX_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// A stored value and the moment it stops being served.
///
/// Entries are replaced wholesale on every `set` and never edited in place.
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            expires_at: now + ttl.min(MAX_TTL),
        }
    }

    /// Valid strictly before `expires_at`.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Instant::now())
    }

    pub fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }
}

/// Knobs for a fetcher instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetcherConfig {
    pub default_ttl: Duration,
    /// Upper bound on how long a caller waits for an in-flight fetch.
    /// Expiry of the wait never cancels the fetch itself. Never `Some(ZERO)`.
    pub wait_timeout: Option<Duration>,
    pub stale_policy: StalePolicy,
}

impl FetcherConfig {
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// A zero timeout means no bound.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            wait_timeout: None,
            stale_policy: StalePolicy::Wait,
        }
    }
}

impl From<&Config> for FetcherConfig {
    fn from(config: &Config) -> Self {
        Self {
            default_ttl: config.default_ttl,
            wait_timeout: config.wait_timeout.filter(|limit| !limit.is_zero()),
            stale_policy: config.stale_policy,
        }
    }
}
