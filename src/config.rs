//! Service configuration from environment variables.
//!
//! Every setting has a default; only malformed values are errors. Parsing
//! goes through a lookup function so tests never touch the process
//! environment.
//!
//! | Variable                              | Default          |
//! |---------------------------------------|------------------|
//! | `WEBHOOK_SIEVE_LISTEN_ADDR`           | `0.0.0.0:3000`   |
//! | `WEBHOOK_SIEVE_STATE_DIR`             | in-memory store  |
//! | `WEBHOOK_SIEVE_PUBLIC_KEY_PATH`       | built-in key     |
//! | `WEBHOOK_SIEVE_DOWNSTREAM_URL`        | log-only         |
//! | `WEBHOOK_SIEVE_QUEUE_CAPACITY`        | `10000`          |
//! | `WEBHOOK_SIEVE_MAX_BODY_MB`           | `100`            |
//! | `WEBHOOK_SIEVE_METRICS_TTL_SECS`      | `5`              |
//! | `WEBHOOK_SIEVE_MAX_SEEN_IDS`          | `100000`         |
//! | `WEBHOOK_SIEVE_FLUSH_INTERVAL_MS`     | `1000`           |
//! | `WEBHOOK_SIEVE_MAX_QUEUED_BATCHES`    | `1024`           |
//! | `WEBHOOK_SIEVE_OVERFLOW_POLICY`       | `reject`         |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::shard::ShardConfig;

const ENV_LISTEN_ADDR: &str = "WEBHOOK_SIEVE_LISTEN_ADDR";
const ENV_STATE_DIR: &str = "WEBHOOK_SIEVE_STATE_DIR";
const ENV_PUBLIC_KEY_PATH: &str = "WEBHOOK_SIEVE_PUBLIC_KEY_PATH";
const ENV_DOWNSTREAM_URL: &str = "WEBHOOK_SIEVE_DOWNSTREAM_URL";
const ENV_QUEUE_CAPACITY: &str = "WEBHOOK_SIEVE_QUEUE_CAPACITY";
const ENV_MAX_BODY_MB: &str = "WEBHOOK_SIEVE_MAX_BODY_MB";
const ENV_METRICS_TTL_SECS: &str = "WEBHOOK_SIEVE_METRICS_TTL_SECS";
const ENV_MAX_SEEN_IDS: &str = "WEBHOOK_SIEVE_MAX_SEEN_IDS";
const ENV_FLUSH_INTERVAL_MS: &str = "WEBHOOK_SIEVE_FLUSH_INTERVAL_MS";
const ENV_MAX_QUEUED_BATCHES: &str = "WEBHOOK_SIEVE_MAX_QUEUED_BATCHES";
const ENV_OVERFLOW_POLICY: &str = "WEBHOOK_SIEVE_OVERFLOW_POLICY";

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
const DEFAULT_MAX_BODY_MB: usize = 100;
const DEFAULT_METRICS_TTL_SECS: u64 = 5;

/// A configuration value that could not be used.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid value {value:?} for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Everything the service reads at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,

    /// Directory for persisted shard state; `None` keeps state in memory.
    pub state_dir: Option<PathBuf>,

    /// PEM file with the webhook verifying key; `None` uses the built-in key.
    pub public_key_path: Option<PathBuf>,

    /// Endpoint the forwarder POSTs events to; `None` only logs them.
    pub downstream_url: Option<String>,

    /// Capacity of the downstream queue, in messages.
    pub queue_capacity: usize,

    /// Largest accepted request body.
    pub max_body_bytes: usize,

    /// How long `/metrics` answers from its cache.
    pub metrics_ttl: Duration,

    pub shard: ShardConfig,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let listen_addr = parse(ENV_LISTEN_ADDR, get(ENV_LISTEN_ADDR))?
            .map_or_else(|| parse_value(ENV_LISTEN_ADDR, DEFAULT_LISTEN_ADDR), Ok)?;

        let max_body_mb: usize = parse(ENV_MAX_BODY_MB, get(ENV_MAX_BODY_MB))?.unwrap_or(DEFAULT_MAX_BODY_MB);
        let metrics_ttl_secs: u64 =
            parse(ENV_METRICS_TTL_SECS, get(ENV_METRICS_TTL_SECS))?.unwrap_or(DEFAULT_METRICS_TTL_SECS);

        let mut shard = ShardConfig::new();
        if let Some(max) = parse(ENV_MAX_SEEN_IDS, get(ENV_MAX_SEEN_IDS))? {
            shard = shard.with_max_seen_ids(positive(ENV_MAX_SEEN_IDS, max)?);
        }
        if let Some(ms) = parse::<u64>(ENV_FLUSH_INTERVAL_MS, get(ENV_FLUSH_INTERVAL_MS))? {
            shard = shard.with_flush_interval(Duration::from_millis(ms));
        }
        if let Some(max) = parse(ENV_MAX_QUEUED_BATCHES, get(ENV_MAX_QUEUED_BATCHES))? {
            shard = shard.with_max_queued_batches(positive(ENV_MAX_QUEUED_BATCHES, max)?);
        }
        if let Some(policy) = parse(ENV_OVERFLOW_POLICY, get(ENV_OVERFLOW_POLICY))? {
            shard = shard.with_overflow_policy(policy);
        }

        let queue_capacity = parse(ENV_QUEUE_CAPACITY, get(ENV_QUEUE_CAPACITY))?.unwrap_or(DEFAULT_QUEUE_CAPACITY);

        Ok(Config {
            listen_addr,
            state_dir: get(ENV_STATE_DIR).map(PathBuf::from),
            public_key_path: get(ENV_PUBLIC_KEY_PATH).map(PathBuf::from),
            downstream_url: get(ENV_DOWNSTREAM_URL),
            queue_capacity: positive(ENV_QUEUE_CAPACITY, queue_capacity)?,
            max_body_bytes: positive(ENV_MAX_BODY_MB, max_body_mb)?.saturating_mul(1024 * 1024),
            metrics_ttl: Duration::from_secs(metrics_ttl_secs),
            shard,
        })
    }
}

fn parse<T>(var: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.map(|v| parse_value(var, &v)).transpose()
}

fn parse_value<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn positive(var: &'static str, n: usize) -> Result<usize, ConfigError> {
    if n == 0 {
        return Err(ConfigError {
            var,
            value: n.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::OverflowPolicy;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| env.get(name).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from_pairs(&[]).unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(config.state_dir, None);
        assert_eq!(config.public_key_path, None);
        assert_eq!(config.downstream_url, None);
        assert_eq!(config.queue_capacity, 10_000);
        assert_eq!(config.max_body_bytes, 100 * 1024 * 1024);
        assert_eq!(config.metrics_ttl, Duration::from_secs(5));
        assert_eq!(config.shard.max_seen_ids, 100_000);
        assert_eq!(config.shard.overflow_policy, OverflowPolicy::Reject);
    }

    #[test]
    fn values_override_defaults() {
        let config = from_pairs(&[
            ("WEBHOOK_SIEVE_LISTEN_ADDR", "127.0.0.1:8080"),
            ("WEBHOOK_SIEVE_STATE_DIR", "/var/lib/sieve"),
            ("WEBHOOK_SIEVE_DOWNSTREAM_URL", "https://example.test/hook"),
            ("WEBHOOK_SIEVE_MAX_BODY_MB", "2"),
            ("WEBHOOK_SIEVE_METRICS_TTL_SECS", "0"),
            ("WEBHOOK_SIEVE_MAX_SEEN_IDS", "500"),
            ("WEBHOOK_SIEVE_FLUSH_INTERVAL_MS", "250"),
            ("WEBHOOK_SIEVE_MAX_QUEUED_BATCHES", "8"),
            ("WEBHOOK_SIEVE_OVERFLOW_POLICY", "drop-oldest"),
        ])
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.state_dir, Some(PathBuf::from("/var/lib/sieve")));
        assert_eq!(config.downstream_url.as_deref(), Some("https://example.test/hook"));
        assert_eq!(config.max_body_bytes, 2 * 1024 * 1024);
        assert_eq!(config.metrics_ttl, Duration::ZERO);
        assert_eq!(config.shard.max_seen_ids, 500);
        assert_eq!(config.shard.flush_interval, Duration::from_millis(250));
        assert_eq!(config.shard.max_queued_batches, 8);
        assert_eq!(config.shard.overflow_policy, OverflowPolicy::DropOldest);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = from_pairs(&[("WEBHOOK_SIEVE_STATE_DIR", "  ")]).unwrap();
        assert_eq!(config.state_dir, None);
    }

    #[test]
    fn malformed_values_are_errors() {
        let err = from_pairs(&[("WEBHOOK_SIEVE_QUEUE_CAPACITY", "lots")]).unwrap_err();
        assert_eq!(err.var, "WEBHOOK_SIEVE_QUEUE_CAPACITY");
        assert_eq!(err.value, "lots");

        assert!(from_pairs(&[("WEBHOOK_SIEVE_LISTEN_ADDR", "nowhere")]).is_err());
        assert!(from_pairs(&[("WEBHOOK_SIEVE_OVERFLOW_POLICY", "panic")]).is_err());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let err = from_pairs(&[("WEBHOOK_SIEVE_MAX_SEEN_IDS", "0")]).unwrap_err();
        assert_eq!(err.var, "WEBHOOK_SIEVE_MAX_SEEN_IDS");
        assert!(from_pairs(&[("WEBHOOK_SIEVE_MAX_BODY_MB", "0")]).is_err());
    }
}
