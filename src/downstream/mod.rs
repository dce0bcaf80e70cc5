//! Delivery of deduplicated events to the downstream processing queue.
//!
//! Shard actors hand unique events to an [`EventSink`]. In the running
//! service that is a [`ChannelQueue`], a bounded in-process queue drained by
//! a [`Forwarder`] task that POSTs each event to the configured endpoint.
//!
//! Delivery is at-least-once from the sink onwards: a batch that fails to
//! enqueue is retried event by event, and the forwarder retries transient
//! HTTP failures.
//!
//! # Module Structure
//!
//! - [`channel`]: the bounded queue and its message type
//! - [`forwarder`]: HTTP delivery with retry
//! - [`retry`]: exponential backoff helper

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::types::Event;

pub mod channel;
pub mod forwarder;
pub mod retry;

pub use channel::{ChannelQueue, DEFAULT_SEND_TIMEOUT, QueueMessage};
pub use forwarder::{ForwardError, ForwardStats, Forwarder};
pub use retry::RetryConfig;

/// Errors from handing events to the downstream queue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The queue's consumer has gone away.
    #[error("downstream queue closed")]
    Closed,

    /// No capacity became available in time.
    #[error("downstream queue full after {0:?}")]
    Timeout(Duration),

    /// The sink refused the events.
    #[error("downstream rejected events: {0}")]
    Rejected(String),
}

/// Destination for deduplicated events.
pub trait EventSink: Send + Sync + 'static {
    /// Sends a whole batch as one unit.
    fn send_batch(&self, events: &[Event]) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Sends a single event.
    fn send(&self, event: &Event) -> impl Future<Output = Result<(), SinkError>> + Send;
}
