//! Runtime metrics: sample windows, per-shard recording and aggregation.
//!
//! # Module Structure
//!
//! - [`window`]: fixed-capacity ring buffers with mean and percentile
//! - [`shard`]: counters and windows a shard actor updates as it works
//! - [`aggregator`]: folds shard reports into the `/metrics` JSON body

pub mod aggregator;
pub mod shard;
pub mod window;

pub use aggregator::{MetricsSnapshot, ShardReport, aggregate};
pub use shard::{ShardCounters, ShardMetrics};
pub use window::{DEFAULT_WINDOW_CAPACITY, SampleWindow};
