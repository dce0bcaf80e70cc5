//! The single-writer state of one shard.
//!
//! [`ShardState`] owns everything a shard knows: the seen-ID map, the batch
//! being filled, the control parameters, the in-flight and queued batch
//! bookkeeping and the metrics. It performs no I/O and takes the current time
//! as an argument, so the actor can drive it from its event loop and tests
//! can drive it with explicit timestamps.
//!
//! # Batch Lifecycle
//!
//! ```text
//! add ─► pending ─► flush ─┬─► start (dedup) ─► ReadyBatch ─► actor delivers ─► complete
//!                          └─► queued ─────────────────────────────────────────────┘
//! ```
//!
//! A flushed batch starts immediately while fewer than
//! `max_concurrent_batches` are in flight; otherwise it waits in the queue
//! until a running batch completes. Dedup runs when a batch starts, not when
//! it is flushed, so queued batches see every identifier recorded before them.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dedup::{SeenIds, dedup_batch};
use crate::metrics::{ShardMetrics, ShardReport};
use crate::persistence::PersistedSeenIds;
use crate::types::{Event, ShardId, WebhookId};

use super::ShardError;
use super::config::{OverflowPolicy, ShardConfig};
use super::control::{Adjustment, ControlParameters, LoadObservation};

/// A deduplicated batch ready to be sent downstream.
#[derive(Debug)]
pub struct ReadyBatch {
    /// Unique events, in arrival order.
    pub events: Vec<Event>,
    /// Events removed by dedup.
    pub duplicates: usize,
}

/// How the delivery of one batch went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// The batch send failed (or the delivery task died).
    pub batch_failed: bool,
    /// Events that also failed their individual retry.
    pub failed_events: usize,
}

/// Result of the immediate `check` path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Fresh,
    Duplicate,
}

pub struct ShardState {
    shard: ShardId,
    config: Arc<ShardConfig>,
    seen: SeenIds,
    pending: Vec<Event>,
    pending_bytes: usize,
    control: ControlParameters,
    in_flight: usize,
    queued: VecDeque<Vec<Event>>,
    metrics: ShardMetrics,
    window_started_ms: i64,
    window_events: u64,
    last_persist_ms: i64,
    flush_deadline_ms: Option<i64>,
    next_alarm_ms: i64,
}

impl ShardState {
    /// Creates a ready shard around a (possibly hydrated) seen-ID map.
    pub fn new(shard: ShardId, config: Arc<ShardConfig>, mut seen: SeenIds, now_ms: i64) -> Self {
        let evicted = seen.enforce_ceiling(config.max_seen_ids);
        if evicted > 0 {
            warn!(shard = %shard, evicted, "Hydrated map exceeded ceiling, evicted oldest entries");
        }
        ShardState {
            shard,
            control: config.initial_control,
            next_alarm_ms: now_ms.saturating_add(config.alarm_interval_ms()),
            config,
            seen,
            pending: Vec::new(),
            pending_bytes: 0,
            in_flight: 0,
            queued: VecDeque::new(),
            metrics: ShardMetrics::new(),
            window_started_ms: now_ms,
            window_events: 0,
            last_persist_ms: now_ms,
            flush_deadline_ms: None,
        }
    }

    // ─── Batching ─────────────────────────────────────────────────────────────

    /// Buffers an event, returning any batches that became ready.
    ///
    /// Refused with [`ShardError::Overloaded`] when the batch queue is at its
    /// bound under [`OverflowPolicy::Reject`]; nothing is buffered then.
    pub fn add(&mut self, event: Event, now_ms: i64) -> Result<Vec<ReadyBatch>, ShardError> {
        if self.config.overflow_policy == OverflowPolicy::Reject
            && self.queued.len() >= self.config.max_queued_batches
        {
            return Err(ShardError::Overloaded(self.shard));
        }

        if now_ms - self.window_started_ms >= self.config.load_window_ms() {
            self.adapt(now_ms);
        }
        self.window_events += 1;
        self.metrics.record_received();

        let mut ready = Vec::new();
        if self.pending_bytes > self.config.max_pending_bytes {
            debug!(shard = %self.shard, bytes = self.pending_bytes, "Memory pressure, flushing early");
            ready.extend(self.flush(now_ms));
        }

        self.pending_bytes += event.size();
        self.pending.push(event);

        if self.pending.len() >= self.control.batch_size {
            ready.extend(self.flush(now_ms));
        } else if self.flush_deadline_ms.is_none() {
            self.flush_deadline_ms = Some(now_ms.saturating_add(self.config.flush_interval_ms()));
        }

        Ok(ready)
    }

    /// Closes the pending batch, starting it now or queueing it.
    pub fn flush(&mut self, now_ms: i64) -> Option<ReadyBatch> {
        self.flush_deadline_ms = None;
        if self.pending.is_empty() {
            return None;
        }
        let events = std::mem::take(&mut self.pending);
        self.pending_bytes = 0;
        self.metrics.record_queue_depth(self.queued.len());

        if self.in_flight < self.control.max_concurrent_batches {
            Some(self.start(events, now_ms))
        } else {
            self.enqueue(events);
            None
        }
    }

    fn enqueue(&mut self, events: Vec<Event>) {
        if self.config.overflow_policy == OverflowPolicy::DropOldest
            && self.queued.len() >= self.config.max_queued_batches
            && let Some(dropped) = self.queued.pop_front()
        {
            self.metrics.record_shed(dropped.len());
            warn!(shard = %self.shard, shed = dropped.len(), "Batch queue full, dropped oldest batch");
        }
        debug!(shard = %self.shard, size = events.len(), queued = self.queued.len() + 1, "Batch queued");
        self.queued.push_back(events);
    }

    /// Starts a batch: sweeps the map if it is filling up, then dedups.
    fn start(&mut self, events: Vec<Event>, now_ms: i64) -> ReadyBatch {
        self.in_flight += 1;
        self.metrics.record_batch_started(events.len(), self.in_flight);

        let cutoff_ms = now_ms - self.config.dedup_window_ms;
        if self.seen.len() > self.config.cleanup_threshold() {
            let removed = self.seen.cleanup(cutoff_ms);
            debug!(shard = %self.shard, removed, "Cleaned expired entries before batch");
        }

        let size = events.len();
        let outcome = dedup_batch(events, &mut self.seen, now_ms, self.config.dedup_window_ms);
        self.metrics.record_duplicates(outcome.duplicates);
        self.enforce_ceiling(cutoff_ms);

        debug!(
            shard = %self.shard,
            size,
            unique = outcome.unique.len(),
            duplicates = outcome.duplicates,
            in_flight = self.in_flight,
            "Batch started"
        );
        ReadyBatch {
            events: outcome.unique,
            duplicates: outcome.duplicates,
        }
    }

    /// Records a finished batch and starts queued batches while capacity allows.
    pub fn complete(&mut self, processing_ms: u64, outcome: DeliveryOutcome, now_ms: i64) -> Vec<ReadyBatch> {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.metrics.record_batch_completed(processing_ms);
        if outcome.batch_failed {
            self.metrics.record_batch_error();
        }
        self.metrics.record_failed_events(outcome.failed_events);

        let mut ready = Vec::new();
        while self.in_flight < self.control.max_concurrent_batches {
            let Some(events) = self.queued.pop_front() else {
                break;
            };
            ready.push(self.start(events, now_ms));
        }
        ready
    }

    // ─── Immediate check ──────────────────────────────────────────────────────

    /// Checks and records one identifier outside of batching.
    pub fn check(&mut self, id: &WebhookId, now_ms: i64) -> CheckOutcome {
        let cutoff_ms = now_ms - self.config.dedup_window_ms;
        if self.seen.len() > self.config.cleanup_threshold() {
            let removed = self.seen.cleanup(cutoff_ms);
            debug!(shard = %self.shard, removed, "Cleaned expired entries before check");
        }
        if self.seen.observe(id, now_ms, cutoff_ms) {
            self.enforce_ceiling(cutoff_ms);
            CheckOutcome::Fresh
        } else {
            self.metrics.record_duplicates(1);
            CheckOutcome::Duplicate
        }
    }

    /// Keeps the map at or under its ceiling: expired entries go first, then
    /// the oldest.
    fn enforce_ceiling(&mut self, cutoff_ms: i64) {
        if self.seen.len() <= self.config.max_seen_ids {
            return;
        }
        let removed = self.seen.cleanup(cutoff_ms);
        let evicted = self.seen.enforce_ceiling(self.config.max_seen_ids);
        if evicted > 0 {
            warn!(shard = %self.shard, removed, evicted, "Seen-ID map at ceiling, evicted oldest entries");
        }
    }

    // ─── Adaptation ───────────────────────────────────────────────────────────

    fn adapt(&mut self, now_ms: i64) {
        let elapsed_ms = (now_ms - self.window_started_ms).max(1);
        let observation = LoadObservation {
            avg_processing_ms: self.metrics.avg_processing_ms(),
            events_per_minute: self.window_events as f64 * 60_000.0 / elapsed_ms as f64,
            avg_queue_depth: self.metrics.avg_queue_depth(),
        };
        let before = self.control;
        let adjustment = self.control.adjust(&observation);
        // Never drop the limit below the batches already running.
        self.control.max_concurrent_batches = self.control.max_concurrent_batches.max(self.in_flight);
        if adjustment != Adjustment::Hold {
            info!(
                shard = %self.shard,
                ?adjustment,
                batch_size = self.control.batch_size,
                max_concurrent = self.control.max_concurrent_batches,
                previous_batch_size = before.batch_size,
                previous_max_concurrent = before.max_concurrent_batches,
                "Adjusted control parameters"
            );
        }
        self.window_started_ms = now_ms;
        self.window_events = 0;
    }

    // ─── Persistence and alarm ────────────────────────────────────────────────

    /// Whether enough has changed, or enough time passed, to persist.
    pub fn persistence_due(&self, now_ms: i64) -> bool {
        let pending = self.seen.pending_writes();
        pending > 0
            && (pending > self.config.persist_pending_threshold
                || now_ms - self.last_persist_ms >= self.config.persist_interval_ms())
    }

    /// The record to write, or `None` when nothing changed and `force` is off.
    pub fn persistence_record(&self, force: bool) -> Option<PersistedSeenIds> {
        if self.seen.pending_writes() == 0 && !force {
            return None;
        }
        Some(PersistedSeenIds::capture(&self.seen))
    }

    pub fn persist_succeeded(&mut self, now_ms: i64) {
        self.seen.clear_pending_writes();
        self.last_persist_ms = now_ms;
    }

    /// Runs the periodic sweep and schedules the next alarm.
    ///
    /// Returns the number of entries removed.
    pub fn on_alarm(&mut self, now_ms: i64) -> usize {
        let removed = self.seen.cleanup(now_ms - self.config.dedup_window_ms);
        self.next_alarm_ms = now_ms.saturating_add(self.config.alarm_interval_ms());
        removed
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    pub fn shard(&self) -> ShardId {
        self.shard
    }

    pub fn control(&self) -> ControlParameters {
        self.control
    }

    pub fn seen(&self) -> &SeenIds {
        &self.seen
    }

    pub fn metrics(&self) -> &ShardMetrics {
        &self.metrics
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn flush_deadline_ms(&self) -> Option<i64> {
        self.flush_deadline_ms
    }

    pub fn next_alarm_ms(&self) -> i64 {
        self.next_alarm_ms
    }

    /// True when nothing is buffered, queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.queued.is_empty() && self.in_flight == 0
    }

    pub fn report(&self, now_ms: i64) -> ShardReport {
        ShardReport {
            shard: self.shard,
            counters: self.metrics.counters,
            processing_time_ms: self.metrics.processing_time_ms.samples().to_vec(),
            concurrency: self.metrics.concurrency.samples().to_vec(),
            queue_depth: self.metrics.queue_depth.samples().to_vec(),
            control: self.control,
            seen_ids: self.seen.len(),
            pending_writes: self.seen.pending_writes(),
            in_flight: self.in_flight,
            queued: self.queued.len(),
            memory_usage: self.pending_bytes,
            window_events: self.window_events,
            window_elapsed_ms: now_ms - self.window_started_ms,
        }
    }
}
