//! Sharded deduplication and adaptive batching.
//!
//! Every event routes, by a hash of its identifier, to one of 256 shards
//! (or to `default` when it has none). Each shard is an actor that owns its
//! seen-ID map, batches events, deduplicates each batch, hands the unique
//! events downstream under a concurrency limit, and persists its map.
//!
//! # Module Structure
//!
//! - [`router`]: identifier → shard mapping
//! - [`control`]: adaptive batch size and concurrency
//! - [`config`]: per-shard timers, thresholds and overflow policy
//! - [`state`]: the synchronous shard state machine
//! - [`actor`]: the tokio task driving one shard
//! - [`registry`]: lazily spawned actors keyed by shard

use thiserror::Error;

use crate::types::ShardId;

pub mod actor;
pub mod config;
pub mod control;
pub mod message;
pub mod registry;
pub mod router;
pub mod state;


pub use actor::ShardActor;
pub use config::{DEFAULT_MAX_QUEUED_BATCHES, OverflowPolicy, ShardConfig};
pub use control::{Adjustment, ControlParameters, LoadObservation};
pub use message::ShardMessage;
pub use registry::ShardRegistry;
pub use router::{SHARD_COUNT, shard_of};
pub use state::{CheckOutcome, DeliveryOutcome, ReadyBatch, ShardState};

/// Errors a shard returns to its callers.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ShardError {
    /// The shard's batch queue is full and the policy is to refuse.
    #[error("shard {0} is overloaded")]
    Overloaded(ShardId),

    /// The shard's actor is not running.
    #[error("shard {0} is unavailable")]
    Unavailable(ShardId),
}
