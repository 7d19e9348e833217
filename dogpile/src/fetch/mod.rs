pub mod coalescing;
pub mod flight;
pub mod global_lock;
pub mod operation;
pub mod unguarded;

pub use coalescing::CoalescingFetcher;
pub use global_lock::GlobalLockFetcher;
pub use operation::CacheOperations;
pub use unguarded::UnguardedFetcher;

use crate::ports::SourceError;
use shared::Error;
use std::fmt::Debug;

pub(crate) fn source_failure<K: Debug>(key: &K, err: SourceError) -> Error {
    Error::BackingSourceFailure {
        key: format!("{key:?}"),
        reason: err.to_string(),
    }
}
