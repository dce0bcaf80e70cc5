//! Deduplication state and the per-batch dedup pass.
//!
//! # Module Structure
//!
//! - [`seen`]: bounded map of recently seen identifiers with TTL cleanup
//! - [`batch`]: within-batch and cross-batch duplicate filtering

pub mod batch;
pub mod seen;

pub use batch::{DedupOutcome, dedup_batch};
pub use seen::{DEFAULT_DEDUP_WINDOW_MS, DEFAULT_MAX_SEEN_IDS, SeenIds};
