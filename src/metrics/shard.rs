//! Per-shard counters and sample windows.

use super::window::SampleWindow;

/// Cumulative per-shard counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardCounters {
    /// Events accepted into a batch.
    pub total_webhooks: u64,
    /// Batches that finished processing.
    pub processed_batches: u64,
    /// Events dropped as duplicates.
    pub deduplicated: u64,
    /// Batch-level downstream failures and panicked deliveries.
    pub errors: u64,
    /// Events that failed their individual retry.
    pub failed_events: u64,
    /// Events dropped by the overflow policy.
    pub shed_events: u64,
}

impl ShardCounters {
    /// Adds another shard's counters into this one.
    pub fn accumulate(&mut self, other: &ShardCounters) {
        self.total_webhooks += other.total_webhooks;
        self.processed_batches += other.processed_batches;
        self.deduplicated += other.deduplicated;
        self.errors += other.errors;
        self.failed_events += other.failed_events;
        self.shed_events += other.shed_events;
    }
}

/// Everything a shard records about its own activity.
#[derive(Debug, Clone, Default)]
pub struct ShardMetrics {
    pub counters: ShardCounters,
    pub processing_time_ms: SampleWindow,
    pub batch_size: SampleWindow,
    pub concurrency: SampleWindow,
    pub queue_depth: SampleWindow,
}

impl ShardMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&mut self) {
        self.counters.total_webhooks += 1;
    }

    pub fn record_duplicates(&mut self, n: usize) {
        self.counters.deduplicated += n as u64;
    }

    pub fn record_shed(&mut self, n: usize) {
        self.counters.shed_events += n as u64;
    }

    pub fn record_batch_error(&mut self) {
        self.counters.errors += 1;
    }

    pub fn record_failed_events(&mut self, n: usize) {
        self.counters.failed_events += n as u64;
    }

    /// Records that a batch of `size` events started at `concurrency` in flight.
    pub fn record_batch_started(&mut self, size: usize, concurrency: usize) {
        self.batch_size.push(size as u64);
        self.concurrency.push(concurrency as u64);
    }

    pub fn record_batch_completed(&mut self, processing_ms: u64) {
        self.counters.processed_batches += 1;
        self.processing_time_ms.push(processing_ms);
    }

    pub fn record_queue_depth(&mut self, depth: usize) {
        self.queue_depth.push(depth as u64);
    }

    /// Mean processing time; 0 when no batch has completed yet.
    pub fn avg_processing_ms(&self) -> f64 {
        self.processing_time_ms.mean().unwrap_or(0.0)
    }

    pub fn avg_queue_depth(&self) -> f64 {
        self.queue_depth.mean().unwrap_or(0.0)
    }
}
