// shared/src/lib.rs

use std::time::Duration;

/// Failures a cache caller can observe. A miss, lock contention or an expired
/// entry never shows up here.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("backing source failed for key {key}: {reason}")]
    BackingSourceFailure { key: String, reason: String },
    #[error("gave up waiting on in-flight fetch after {0:?}")]
    WaitTimeout(Duration),
    #[error("in-flight fetch for key {0} ended without a result")]
    FetchAbandoned(String),
    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// Whether calling again may succeed. The cache never retries on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::BackingSourceFailure { .. } | Error::WaitTimeout(_) | Error::FetchAbandoned(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod config;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::BackingSourceFailure {
            key: "\"product\"".to_string(),
            reason: "connection refused".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("\"product\""));
        assert!(rendered.contains("connection refused"));

        let err = Error::WaitTimeout(Duration::from_millis(250));
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::WaitTimeout(Duration::from_secs(1)).is_recoverable());
        assert!(Error::FetchAbandoned("k".into()).is_recoverable());
        assert!(
            Error::BackingSourceFailure {
                key: "k".into(),
                reason: "boom".into()
            }
            .is_recoverable()
        );
        assert!(!Error::Config("bad".into()).is_recoverable());
    }
}
