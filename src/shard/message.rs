//! Messages a shard actor receives over its channel.

use tokio::sync::oneshot;

use crate::metrics::ShardReport;
use crate::types::{Event, WebhookId};

use super::ShardError;
use super::state::CheckOutcome;

/// Requests handled serially by one shard actor.
#[derive(Debug)]
pub enum ShardMessage {
    /// Buffer an event. Answered once it is in the pending batch (or refused).
    Add {
        event: Event,
        reply: oneshot::Sender<Result<(), ShardError>>,
    },

    /// Check and record an identifier immediately.
    Check {
        id: WebhookId,
        reply: oneshot::Sender<CheckOutcome>,
    },

    /// Report current metrics and state sizes.
    Report { reply: oneshot::Sender<ShardReport> },

    /// Flush, drain in-flight work, persist and stop.
    Shutdown,
}
