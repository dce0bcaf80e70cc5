//! Drains the downstream queue and delivers each event over HTTP.
//!
//! Every event is POSTed as JSON to the configured endpoint. Transient
//! failures are retried with exponential backoff; an event that still fails
//! is logged and dropped. Without an endpoint the forwarder only logs events.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::types::Event;

use super::channel::QueueMessage;
use super::retry::{RetryConfig, Transient, retry_with_backoff};

/// Per-request timeout for downstream POSTs.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from a single delivery attempt.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("endpoint returned {0}")]
    Status(u16),
}

impl Transient for ForwardError {
    fn is_transient(&self) -> bool {
        match self {
            ForwardError::Http(e) => !e.is_builder(),
            ForwardError::Status(status) => *status >= 500 || *status == 429,
        }
    }
}

/// Delivery totals reported when the forwarder stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    pub delivered: u64,
    pub failed: u64,
}

/// Consumer half of the downstream queue.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    target: Option<String>,
    retry: RetryConfig,
}

impl Forwarder {
    /// Creates a forwarder that POSTs to `target`, or only logs when `None`.
    pub fn new(target: Option<String>, retry: RetryConfig) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Forwarder {
            client,
            target,
            retry,
        })
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Runs until the queue is closed and empty, or `shutdown` fires.
    ///
    /// On shutdown the queue stops accepting messages and everything already
    /// buffered is still delivered.
    #[instrument(skip_all, fields(target = self.target.as_deref().unwrap_or("log-only")))]
    pub async fn run(self, mut rx: mpsc::Receiver<QueueMessage>, shutdown: CancellationToken) -> ForwardStats {
        info!("Forwarder started");
        let mut stats = ForwardStats::default();

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(message) => self.deliver_message(message, &mut stats).await,
                        None => break,
                    }
                }
                _ = shutdown.cancelled() => {
                    rx.close();
                    while let Some(message) = rx.recv().await {
                        self.deliver_message(message, &mut stats).await;
                    }
                    break;
                }
            }
        }

        info!(delivered = stats.delivered, failed = stats.failed, "Forwarder stopped");
        stats
    }

    async fn deliver_message(&self, message: QueueMessage, stats: &mut ForwardStats) {
        for event in message.into_events() {
            match self.deliver(&event).await {
                Ok(()) => stats.delivered += 1,
                Err((e, attempts)) => {
                    stats.failed += 1;
                    error!(
                        webhook_id = ?event.webhook_id(),
                        attempts,
                        error = %e,
                        "Dropping event after failed delivery"
                    );
                }
            }
        }
    }

    /// Delivers one event, retrying transient failures.
    pub async fn deliver(&self, event: &Event) -> Result<(), (ForwardError, u32)> {
        let Some(target) = self.target.as_deref() else {
            debug!(webhook_id = ?event.webhook_id(), payload = %event.payload(), "Event forwarded (log-only)");
            return Ok(());
        };

        let client = &self.client;
        retry_with_backoff(self.retry, move || async move {
            let response = client.post(target).json(event).send().await?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                warn!(status = status.as_u16(), "Downstream rejected event");
                Err(ForwardError::Status(status.as_u16()))
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downstream::{ChannelQueue, DEFAULT_SEND_TIMEOUT, EventSink};
    use crate::test_utils::event_with_id;
    use axum::Json;
    use axum::extract::State;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    struct Receiver {
        calls: Arc<AtomicUsize>,
        fail_first: usize,
        status: Option<StatusCode>,
        received: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    async fn receive(State(r): State<Receiver>, Json(body): Json<serde_json::Value>) -> StatusCode {
        let n = r.calls.fetch_add(1, Ordering::SeqCst);
        if n < r.fail_first {
            return r.status.unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
        }
        r.received.lock().await.push(body);
        StatusCode::OK
    }

    async fn spawn_receiver(receiver: Receiver) -> String {
        let app = axum::Router::new()
            .route("/hook", axum::routing::post(receive))
            .with_state(receiver);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/hook", addr)
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        assert!(ForwardError::Status(503).is_transient());
        assert!(ForwardError::Status(429).is_transient());
        assert!(!ForwardError::Status(400).is_transient());
        assert!(!ForwardError::Status(404).is_transient());
    }

    #[tokio::test]
    async fn log_only_mode_accepts_everything() {
        let forwarder = Forwarder::new(None, RetryConfig::NONE).unwrap();
        assert!(forwarder.deliver(&event_with_id("a")).await.is_ok());
        assert_eq!(forwarder.target(), None);
    }

    #[tokio::test]
    async fn posts_each_event_after_transient_failure() {
        let receiver = Receiver {
            fail_first: 1,
            ..Receiver::default()
        };
        let url = spawn_receiver(receiver.clone()).await;
        let forwarder = Forwarder::new(Some(url), fast_retry()).unwrap();

        forwarder.deliver(&event_with_id("a")).await.unwrap();

        assert_eq!(receiver.calls.load(Ordering::SeqCst), 2);
        let received = receiver.received.lock().await;
        assert_eq!(received[0]["webhookId"], "a");
    }

    #[tokio::test]
    async fn client_errors_fail_without_retry() {
        let receiver = Receiver {
            fail_first: usize::MAX,
            status: Some(StatusCode::BAD_REQUEST),
            ..Receiver::default()
        };
        let url = spawn_receiver(receiver.clone()).await;
        let forwarder = Forwarder::new(Some(url), fast_retry()).unwrap();

        let err = forwarder.deliver(&event_with_id("a")).await.unwrap_err();

        assert!(matches!(err, (ForwardError::Status(400), 1)));
        assert_eq!(receiver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_drains_queue_on_shutdown() {
        let receiver = Receiver::default();
        let url = spawn_receiver(receiver.clone()).await;
        let forwarder = Forwarder::new(Some(url), fast_retry()).unwrap();
        let (queue, rx) = ChannelQueue::new(16, DEFAULT_SEND_TIMEOUT);

        queue
            .send_batch(&[event_with_id("a"), event_with_id("b")])
            .await
            .unwrap();
        queue.send(&event_with_id("c")).await.unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let stats = forwarder.run(rx, shutdown).await;

        assert_eq!(stats, ForwardStats { delivered: 3, failed: 0 });
        assert_eq!(receiver.received.lock().await.len(), 3);
    }
}
