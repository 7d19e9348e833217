use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::{Error, Result};

/// What a caller does when a refresh for its key is already running.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StalePolicy {
    /// Wait for the in-flight fetch and return its result.
    #[default]
    Wait,
    /// Return the expired value if the store still holds one.
    ServeStale,
}

impl FromStr for StalePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wait" => Ok(StalePolicy::Wait),
            "serve-stale" | "serve_stale" | "stale" => Ok(StalePolicy::ServeStale),
            other => Err(Error::Config(format!("unknown stale policy '{other}'"))),
        }
    }
}

/// Which `TtlStore` implementation backs the cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreKind {
    #[default]
    Memory,
    Moka,
}

impl FromStr for StoreKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "dashmap" => Ok(StoreKind::Memory),
            "moka" => Ok(StoreKind::Moka),
            other => Err(Error::Config(format!("unknown store kind '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub default_ttl: Duration,
    pub wait_timeout: Option<Duration>,
    pub stale_policy: StalePolicy,
    pub store: StoreKind,
    pub stale_retention: Duration,
    pub sim_requesters: usize,
    pub sim_fetch_latency: Duration,
}

impl Config {
    pub const DEFAULT_TTL_SECS: u64 = 3;
    const DEFAULT_SIM_REQUESTERS: usize = 10;
    const DEFAULT_SIM_FETCH_LATENCY_MS: u64 = 1000;

    const TTL_VAR: &str = "DOGPILE_DEFAULT_TTL_SECS";
    const WAIT_TIMEOUT_VAR: &str = "DOGPILE_WAIT_TIMEOUT_MS";
    const STALE_POLICY_VAR: &str = "DOGPILE_STALE_POLICY";
    const STORE_VAR: &str = "DOGPILE_STORE";
    const STALE_RETENTION_VAR: &str = "DOGPILE_STALE_RETENTION_SECS";
    const SIM_REQUESTERS_VAR: &str = "DOGPILE_SIM_REQUESTERS";
    const SIM_LATENCY_VAR: &str = "DOGPILE_SIM_FETCH_LATENCY_MS";

    /// Reads the process environment, falling back to defaults (with a warning)
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like `from_env` but rejects unparsable values.
    pub fn try_from_env() -> Result<Self> {
        Self::try_from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            default_ttl: lenient(read::<u64>(&lookup, Self::TTL_VAR))
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_ttl),
            wait_timeout: lenient(read_wait_timeout(&lookup)),
            stale_policy: lenient(read(&lookup, Self::STALE_POLICY_VAR))
                .unwrap_or(defaults.stale_policy),
            store: lenient(read(&lookup, Self::STORE_VAR)).unwrap_or(defaults.store),
            stale_retention: lenient(read::<u64>(&lookup, Self::STALE_RETENTION_VAR))
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_retention),
            sim_requesters: lenient(read(&lookup, Self::SIM_REQUESTERS_VAR))
                .unwrap_or(defaults.sim_requesters),
            sim_fetch_latency: lenient(read::<u64>(&lookup, Self::SIM_LATENCY_VAR))
                .map(Duration::from_millis)
                .unwrap_or(defaults.sim_fetch_latency),
        }
    }

    pub fn try_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            default_ttl: read::<u64>(&lookup, Self::TTL_VAR)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_ttl),
            wait_timeout: read_wait_timeout(&lookup)?,
            stale_policy: read(&lookup, Self::STALE_POLICY_VAR)?.unwrap_or(defaults.stale_policy),
            store: read(&lookup, Self::STORE_VAR)?.unwrap_or(defaults.store),
            stale_retention: read::<u64>(&lookup, Self::STALE_RETENTION_VAR)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_retention),
            sim_requesters: read(&lookup, Self::SIM_REQUESTERS_VAR)?
                .unwrap_or(defaults.sim_requesters),
            sim_fetch_latency: read::<u64>(&lookup, Self::SIM_LATENCY_VAR)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.sim_fetch_latency),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(Self::DEFAULT_TTL_SECS),
            wait_timeout: None,
            stale_policy: StalePolicy::Wait,
            store: StoreKind::Memory,
            stale_retention: Duration::ZERO,
            sim_requesters: Self::DEFAULT_SIM_REQUESTERS,
            sim_fetch_latency: Duration::from_millis(Self::DEFAULT_SIM_FETCH_LATENCY_MS),
        }
    }
}

fn lenient<T>(value: Result<Option<T>>) -> Option<T> {
    value.unwrap_or_else(|err| {
        warn!("{err}, using default");
        None
    })
}

// A zero wait would fail every cold lookup while its fetch still succeeds, so it
// is rejected rather than read as "no timeout". Leave the variable unset for that.
fn read_wait_timeout(lookup: &impl Fn(&str) -> Option<String>) -> Result<Option<Duration>> {
    match read::<u64>(lookup, Config::WAIT_TIMEOUT_VAR)? {
        Some(0) => Err(Error::Config(format!(
            "{} must be greater than zero",
            Config::WAIT_TIMEOUT_VAR
        ))),
        millis => Ok(millis.map(Duration::from_millis)),
    }
}

// Unset and blank variables both read as None.
fn read<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| Error::Config(format!("invalid value '{raw}' for {name}: {err}"))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(lookup_from(&[]));
        assert_eq!(config, Config::default());
        assert_eq!(config.default_ttl, Duration::from_secs(3));
        assert_eq!(config.wait_timeout, None);
        assert_eq!(config.stale_policy, StalePolicy::Wait);
        assert_eq!(config.store, StoreKind::Memory);
    }

    #[test]
    fn test_reads_every_variable() {
        let config = Config::try_from_lookup(lookup_from(&[
            ("DOGPILE_DEFAULT_TTL_SECS", "30"),
            ("DOGPILE_WAIT_TIMEOUT_MS", "250"),
            ("DOGPILE_STALE_POLICY", "serve-stale"),
            ("DOGPILE_STORE", "moka"),
            ("DOGPILE_STALE_RETENTION_SECS", "60"),
            ("DOGPILE_SIM_REQUESTERS", "25"),
            ("DOGPILE_SIM_FETCH_LATENCY_MS", "40"),
        ]))
        .unwrap();

        assert_eq!(config.default_ttl, Duration::from_secs(30));
        assert_eq!(config.wait_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.stale_policy, StalePolicy::ServeStale);
        assert_eq!(config.store, StoreKind::Moka);
        assert_eq!(config.stale_retention, Duration::from_secs(60));
        assert_eq!(config.sim_requesters, 25);
        assert_eq!(config.sim_fetch_latency, Duration::from_millis(40));
    }

    #[test]
    fn test_lenient_falls_back_per_variable() {
        let config = Config::from_lookup(lookup_from(&[
            ("DOGPILE_DEFAULT_TTL_SECS", "soon"),
            ("DOGPILE_STORE", "moka"),
        ]));
        assert_eq!(config.default_ttl, Duration::from_secs(Config::DEFAULT_TTL_SECS));
        assert_eq!(config.store, StoreKind::Moka);
    }

    #[test]
    fn test_strict_rejects_garbage() {
        let result = Config::try_from_lookup(lookup_from(&[("DOGPILE_STALE_POLICY", "maybe")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_blank_value_is_unset() {
        let config =
            Config::try_from_lookup(lookup_from(&[("DOGPILE_WAIT_TIMEOUT_MS", "  ")])).unwrap();
        assert_eq!(config.wait_timeout, None);
    }

    #[test]
    fn test_zero_wait_timeout_is_rejected() {
        let zero = lookup_from(&[("DOGPILE_WAIT_TIMEOUT_MS", "0")]);
        let result = Config::try_from_lookup(&zero);
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("DOGPILE_WAIT_TIMEOUT_MS")));

        let config = Config::from_lookup(zero);
        assert_eq!(config.wait_timeout, None);
    }
}
