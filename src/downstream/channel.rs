//! Bounded in-process queue between shard actors and the forwarder.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::SendTimeoutError};

use crate::types::Event;

use super::{EventSink, SinkError};

/// Default time a shard waits for queue capacity before giving up.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// One queue entry: either a deduplicated batch or a single retried event.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueMessage {
    Batch(Vec<Event>),
    Single(Event),
}

impl QueueMessage {
    pub fn into_events(self) -> Vec<Event> {
        match self {
            QueueMessage::Batch(events) => events,
            QueueMessage::Single(event) => vec![event],
        }
    }
}

/// Producer half of the downstream queue.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    tx: mpsc::Sender<QueueMessage>,
    send_timeout: Duration,
}

impl ChannelQueue {
    /// Creates a queue holding up to `capacity` messages.
    pub fn new(capacity: usize, send_timeout: Duration) -> (Self, mpsc::Receiver<QueueMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (ChannelQueue { tx, send_timeout }, rx)
    }

    async fn enqueue(&self, message: QueueMessage) -> Result<(), SinkError> {
        self.tx
            .send_timeout(message, self.send_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => SinkError::Timeout(self.send_timeout),
                SendTimeoutError::Closed(_) => SinkError::Closed,
            })
    }
}

impl EventSink for ChannelQueue {
    fn send_batch(&self, events: &[Event]) -> impl Future<Output = Result<(), SinkError>> + Send {
        let message = QueueMessage::Batch(events.to_vec());
        async move {
            if events.is_empty() {
                return Ok(());
            }
            self.enqueue(message).await
        }
    }

    fn send(&self, event: &Event) -> impl Future<Output = Result<(), SinkError>> + Send {
        let message = QueueMessage::Single(event.clone());
        async move { self.enqueue(message).await }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::event_with_id;

    #[tokio::test]
    async fn batch_arrives_as_one_message() {
        let (queue, mut rx) = ChannelQueue::new(4, DEFAULT_SEND_TIMEOUT);
        let events = vec![event_with_id("a"), event_with_id("b")];

        queue.send_batch(&events).await.unwrap();

        assert_eq!(rx.recv().await, Some(QueueMessage::Batch(events)));
    }

    #[tokio::test]
    async fn empty_batch_is_not_enqueued() {
        let (queue, mut rx) = ChannelQueue::new(4, DEFAULT_SEND_TIMEOUT);
        queue.send_batch(&[]).await.unwrap();
        drop(queue);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn single_event_message() {
        let (queue, mut rx) = ChannelQueue::new(4, DEFAULT_SEND_TIMEOUT);
        queue.send(&event_with_id("a")).await.unwrap();
        let message = rx.recv().await.unwrap();
        assert_eq!(message.into_events(), vec![event_with_id("a")]);
    }

    #[tokio::test]
    async fn closed_queue_reports_closed() {
        let (queue, rx) = ChannelQueue::new(4, DEFAULT_SEND_TIMEOUT);
        drop(rx);
        assert!(matches!(
            queue.send(&event_with_id("a")).await,
            Err(SinkError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_times_out() {
        let (queue, _rx) = ChannelQueue::new(1, Duration::from_millis(50));
        queue.send(&event_with_id("a")).await.unwrap();

        assert!(matches!(
            queue.send(&event_with_id("b")).await,
            Err(SinkError::Timeout(_))
        ));
    }
}
