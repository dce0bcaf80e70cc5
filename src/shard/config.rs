//! Per-shard tuning: timers, thresholds and the queue overflow policy.

use std::str::FromStr;
use std::time::Duration;

use crate::dedup::{DEFAULT_DEDUP_WINDOW_MS, DEFAULT_MAX_SEEN_IDS};

use super::control::{ControlParameters, INITIAL_BATCH_SIZE, INITIAL_CONCURRENCY};

/// Default interval before a partially filled batch is flushed (1 second).
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;

/// Default load window between adaptive adjustments (60 seconds).
const DEFAULT_LOAD_WINDOW_SECS: u64 = 60;

/// Default time between persistence runs (60 seconds).
const DEFAULT_PERSIST_INTERVAL_SECS: u64 = 60;

/// Pending writes that force a persistence run regardless of the interval.
const DEFAULT_PERSIST_PENDING_THRESHOLD: usize = 1000;

/// Default alarm period (5 minutes).
const DEFAULT_ALARM_INTERVAL_SECS: u64 = 300;

/// Pending batch bytes that trigger an early flush.
const DEFAULT_MAX_PENDING_BYTES: usize = 100_000;

/// Default bound on batches waiting for a concurrency slot.
pub const DEFAULT_MAX_QUEUED_BATCHES: usize = 1024;

/// What a shard does when its batch queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Refuse new events until the queue drains (ingress answers 503).
    #[default]
    Reject,
    /// Drop the oldest queued batch to make room.
    DropOldest,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(OverflowPolicy::Reject),
            "drop-oldest" | "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            other => Err(format!("unknown overflow policy: {other}")),
        }
    }
}

/// Configuration shared by every shard actor.
#[derive(Debug, Clone)]
pub struct ShardConfig {
    /// Ceiling on tracked identifiers.
    pub max_seen_ids: usize,

    /// How long an identifier suppresses repeats, in milliseconds.
    pub dedup_window_ms: i64,

    /// How long a partial batch may wait before it is flushed.
    pub flush_interval: Duration,

    /// Period between adaptive adjustments.
    pub load_window: Duration,

    /// Maximum time between persistence runs while writes are pending.
    pub persist_interval: Duration,

    /// Pending writes that force persistence early.
    pub persist_pending_threshold: usize,

    /// Period of the cleanup-and-persist alarm.
    pub alarm_interval: Duration,

    /// Pending batch size in bytes that forces a flush before appending.
    pub max_pending_bytes: usize,

    /// Control parameters a new shard starts with.
    pub initial_control: ControlParameters,

    /// Bound on batches waiting for a concurrency slot.
    pub max_queued_batches: usize,

    /// Behaviour when the queue bound is reached.
    pub overflow_policy: OverflowPolicy,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardConfig {
    pub fn new() -> Self {
        ShardConfig {
            max_seen_ids: DEFAULT_MAX_SEEN_IDS,
            dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            load_window: Duration::from_secs(DEFAULT_LOAD_WINDOW_SECS),
            persist_interval: Duration::from_secs(DEFAULT_PERSIST_INTERVAL_SECS),
            persist_pending_threshold: DEFAULT_PERSIST_PENDING_THRESHOLD,
            alarm_interval: Duration::from_secs(DEFAULT_ALARM_INTERVAL_SECS),
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            initial_control: ControlParameters::new(INITIAL_BATCH_SIZE, INITIAL_CONCURRENCY),
            max_queued_batches: DEFAULT_MAX_QUEUED_BATCHES,
            overflow_policy: OverflowPolicy::Reject,
        }
    }

    pub fn with_max_seen_ids(mut self, max: usize) -> Self {
        self.max_seen_ids = max;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_load_window(mut self, window: Duration) -> Self {
        self.load_window = window;
        self
    }

    pub fn with_alarm_interval(mut self, interval: Duration) -> Self {
        self.alarm_interval = interval;
        self
    }

    pub fn with_initial_control(mut self, control: ControlParameters) -> Self {
        self.initial_control = control;
        self
    }

    pub fn with_max_queued_batches(mut self, max: usize) -> Self {
        self.max_queued_batches = max;
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Occupancy above which a batch triggers TTL cleanup first (80%).
    pub fn cleanup_threshold(&self) -> usize {
        self.max_seen_ids * 8 / 10
    }

    pub(crate) fn flush_interval_ms(&self) -> i64 {
        duration_ms(self.flush_interval)
    }

    pub(crate) fn load_window_ms(&self) -> i64 {
        duration_ms(self.load_window)
    }

    pub(crate) fn persist_interval_ms(&self) -> i64 {
        duration_ms(self.persist_interval)
    }

    pub(crate) fn alarm_interval_ms(&self) -> i64 {
        duration_ms(self.alarm_interval)
    }
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
