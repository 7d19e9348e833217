#![deny(clippy::all)]

//! Stampede-safe TTL caching over a slow backing source.
//!
//! A fetcher sits between callers and a [`ports::BackingSource`]. Fresh values
//! come straight out of a [`ports::TtlStore`]; when a key is missing or expired
//! the [`fetch::CoalescingFetcher`] lets exactly one fetch run per key and hands
//! its outcome to every caller that asked in the meantime.

pub mod domain;
pub mod events;
pub mod fetch;
pub mod ports;
pub mod stats;

pub use domain::{CacheEntry, DEFAULT_TTL, FetcherConfig};
pub use events::LookupEvent;
pub use fetch::{CacheOperations, CoalescingFetcher, GlobalLockFetcher, UnguardedFetcher};
pub use ports::{BackingSource, SourceError, StoreFactory, TtlStore};
pub use shared::config::StalePolicy;
pub use shared::{Error, Result};
pub use stats::{FetchStats, StatsSnapshot};
