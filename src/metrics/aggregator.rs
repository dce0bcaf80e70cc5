//! Cross-shard aggregation into the `/metrics` snapshot.
//!
//! Each live shard answers a report request with a [`ShardReport`]; the
//! reports are folded into one [`MetricsSnapshot`]. Counters are summed,
//! percentiles are taken over the union of all retained processing-time
//! samples, and rates are normalized to events per second.

use serde::Serialize;

use crate::shard::ControlParameters;
use crate::types::ShardId;

use super::shard::ShardCounters;
use super::window::{mean, percentile};

/// Point-in-time view of one shard.
#[derive(Debug, Clone)]
pub struct ShardReport {
    pub shard: ShardId,
    pub counters: ShardCounters,
    pub processing_time_ms: Vec<u64>,
    pub concurrency: Vec<u64>,
    pub queue_depth: Vec<u64>,
    pub control: ControlParameters,
    pub seen_ids: usize,
    pub pending_writes: usize,
    pub in_flight: usize,
    pub queued: usize,
    /// Bytes buffered in the pending batch.
    pub memory_usage: usize,
    /// Events counted in the currently open load window.
    pub window_events: u64,
    /// Time the open load window has been running.
    pub window_elapsed_ms: i64,
}

impl ShardReport {
    /// Events per second in the open load window.
    pub fn current_load(&self) -> f64 {
        if self.window_elapsed_ms <= 0 {
            return 0.0;
        }
        self.window_events as f64 * 1000.0 / self.window_elapsed_ms as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessingTime {
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub avg: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConcurrencyStats {
    pub current: usize,
    pub max: usize,
    pub avg: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub current: usize,
    pub avg: f64,
}

/// The JSON body served by `GET /metrics`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_webhooks: u64,
    pub processed_batches: u64,
    pub deduplicated: u64,
    pub errors: u64,
    pub failed_events: u64,
    pub shed_events: u64,
    pub webhooks_per_second: f64,
    pub memory_usage: usize,
    pub batch_size: f64,
    pub seen_webhooks: usize,
    pub pending_writes: usize,
    pub processing_time: ProcessingTime,
    pub current_load: f64,
    pub concurrency: ConcurrencyStats,
    pub queue: QueueStats,
    pub shards: usize,
}

/// Folds shard reports into one snapshot.
///
/// `uptime_secs` is the time since the process started and normalizes
/// `webhooksPerSecond`.
pub fn aggregate(reports: &[ShardReport], uptime_secs: f64) -> MetricsSnapshot {
    let mut snapshot = MetricsSnapshot {
        shards: reports.len(),
        ..MetricsSnapshot::default()
    };

    let mut counters = ShardCounters::default();
    let mut processing = Vec::new();
    let mut concurrency = Vec::new();
    let mut queue_depth = Vec::new();
    let mut batch_size_sum = 0usize;

    for report in reports {
        counters.accumulate(&report.counters);
        processing.extend_from_slice(&report.processing_time_ms);
        concurrency.extend_from_slice(&report.concurrency);
        queue_depth.extend_from_slice(&report.queue_depth);
        batch_size_sum += report.control.batch_size;

        snapshot.memory_usage += report.memory_usage;
        snapshot.seen_webhooks += report.seen_ids;
        snapshot.pending_writes += report.pending_writes;
        snapshot.current_load += report.current_load();
        snapshot.concurrency.current += report.in_flight;
        snapshot.concurrency.max += report.control.max_concurrent_batches;
        snapshot.queue.current += report.queued;
    }

    snapshot.total_webhooks = counters.total_webhooks;
    snapshot.processed_batches = counters.processed_batches;
    snapshot.deduplicated = counters.deduplicated;
    snapshot.errors = counters.errors;
    snapshot.failed_events = counters.failed_events;
    snapshot.shed_events = counters.shed_events;

    if uptime_secs > 0.0 {
        snapshot.webhooks_per_second = counters.total_webhooks as f64 / uptime_secs;
    }
    if !reports.is_empty() {
        snapshot.batch_size = batch_size_sum as f64 / reports.len() as f64;
    }

    snapshot.processing_time = ProcessingTime {
        p50: percentile(&processing, 0.5),
        p95: percentile(&processing, 0.95),
        p99: percentile(&processing, 0.99),
        avg: mean(&processing).unwrap_or(0.0),
    };
    snapshot.concurrency.avg = mean(&concurrency).unwrap_or(0.0);
    snapshot.queue.avg = mean(&queue_depth).unwrap_or(0.0);

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(shard: u16, processing: Vec<u64>) -> ShardReport {
        ShardReport {
            shard: ShardId::Index(shard),
            counters: ShardCounters {
                total_webhooks: 10,
                processed_batches: 2,
                deduplicated: 1,
                ..ShardCounters::default()
            },
            processing_time_ms: processing,
            concurrency: vec![1, 2],
            queue_depth: vec![0],
            control: ControlParameters::default(),
            seen_ids: 9,
            pending_writes: 3,
            in_flight: 1,
            queued: 0,
            memory_usage: 100,
            window_events: 10,
            window_elapsed_ms: 2000,
        }
    }

    #[test]
    fn empty_registry_yields_zeroes() {
        let snapshot = aggregate(&[], 10.0);
        assert_eq!(snapshot, MetricsSnapshot::default());
    }

    #[test]
    fn sums_and_percentiles_span_shards() {
        let reports = vec![
            report(1, (1..=50).collect()),
            report(2, (51..=100).collect()),
        ];

        let snapshot = aggregate(&reports, 4.0);

        assert_eq!(snapshot.shards, 2);
        assert_eq!(snapshot.total_webhooks, 20);
        assert_eq!(snapshot.processed_batches, 4);
        assert_eq!(snapshot.deduplicated, 2);
        assert_eq!(snapshot.webhooks_per_second, 5.0);
        assert_eq!(snapshot.seen_webhooks, 18);
        assert_eq!(snapshot.pending_writes, 6);
        assert_eq!(snapshot.memory_usage, 200);
        assert_eq!(snapshot.batch_size, 50.0);
        assert_eq!(snapshot.processing_time.p50, 51);
        assert_eq!(snapshot.processing_time.p99, 100);
        assert_eq!(snapshot.processing_time.avg, 50.5);
        assert_eq!(snapshot.concurrency.current, 2);
        assert_eq!(snapshot.concurrency.max, 10);
        assert_eq!(snapshot.concurrency.avg, 1.5);
        assert_eq!(snapshot.current_load, 10.0);
    }

    #[test]
    fn serializes_camel_case() {
        let value = serde_json::to_value(aggregate(&[report(0, vec![5])], 1.0)).unwrap();
        assert_eq!(value["totalWebhooks"], 10);
        assert_eq!(value["processingTime"]["p95"], 5);
        assert_eq!(value["concurrency"]["max"], 5);
        assert!(value.get("queue").is_some());
        assert!(value.get("webhooksPerSecond").is_some());
    }

    #[test]
    fn current_load_handles_fresh_window() {
        let mut r = report(0, vec![]);
        r.window_elapsed_ms = 0;
        assert_eq!(r.current_load(), 0.0);
    }
}
