//! The per-shard actor task.
//!
//! Each shard runs as one tokio task that owns its [`ShardState`] outright.
//! Requests arrive over a bounded channel and are handled one at a time, so
//! no lock guards any shard state.
//!
//! # Event Loop
//!
//! The loop waits on, in one `select!`:
//! - the shutdown token and incoming messages
//! - the flush deadline, armed by the first event of a batch
//! - the alarm deadline, re-armed every time it fires; each alarm sweeps
//!   expired entries and writes the map whether or not it changed
//! - completion of in-flight downstream deliveries
//!
//! Downstream sends run as tasks in a `JoinSet`; the state's in-flight
//! counter caps how many exist at once. Storage writes are awaited inline,
//! so no mutation can interleave with a snapshot being written.
//!
//! # Clock
//!
//! Timestamps are epoch milliseconds taken from the wall clock once at
//! startup and advanced with tokio's monotonic clock. Deadlines and dedup
//! timestamps therefore share one time base, which also follows tokio's
//! paused test clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::dedup::SeenIds;
use crate::downstream::EventSink;
use crate::persistence::{StateStore, load_seen_ids, save_seen_ids};
use crate::types::{Event, ShardId};

use super::config::ShardConfig;
use super::message::ShardMessage;
use super::state::{DeliveryOutcome, ReadyBatch, ShardState};

/// Maps tokio instants to epoch milliseconds.
#[derive(Debug, Clone, Copy)]
struct Clock {
    origin: Instant,
    origin_ms: i64,
}

impl Clock {
    fn start() -> Self {
        Clock {
            origin: Instant::now(),
            origin_ms: Utc::now().timestamp_millis(),
        }
    }

    fn now_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.origin_ms.saturating_add(elapsed)
    }

    fn instant_at(&self, ms: i64) -> Instant {
        let offset = u64::try_from(ms.saturating_sub(self.origin_ms)).unwrap_or(0);
        self.origin + Duration::from_millis(offset)
    }
}

/// What a delivery task hands back to the actor.
struct Delivered {
    processing_ms: u64,
    outcome: DeliveryOutcome,
}

/// A running shard.
pub struct ShardActor<Q, S> {
    state: ShardState,
    sink: Arc<Q>,
    store: Arc<S>,
    clock: Clock,
    deliveries: JoinSet<Delivered>,
}

impl<Q: EventSink, S: StateStore> ShardActor<Q, S> {
    /// Loads the shard's persisted seen-ID map and builds a ready actor.
    ///
    /// An unreadable or incompatible record is logged and the shard starts
    /// empty; hydration never fails.
    #[instrument(skip(config, sink, store), fields(shard = %shard))]
    pub async fn hydrate(shard: ShardId, config: Arc<ShardConfig>, sink: Arc<Q>, store: Arc<S>) -> Self {
        let seen = match load_seen_ids(&*store, shard).await {
            Ok(Some(seen)) => {
                info!(entries = seen.len(), "Hydrated seen-ID map");
                seen
            }
            Ok(None) => {
                debug!("No persisted state, starting empty");
                SeenIds::new()
            }
            Err(e) => {
                warn!(error = %e, "Discarding unreadable persisted state, starting empty");
                SeenIds::new()
            }
        };

        let clock = Clock::start();
        ShardActor {
            state: ShardState::new(shard, config, seen, clock.now_ms()),
            sink,
            store,
            clock,
            deliveries: JoinSet::new(),
        }
    }

    /// Runs the actor until shutdown, then drains and persists.
    #[instrument(skip_all, fields(shard = %self.state.shard()))]
    pub async fn run(mut self, mut rx: mpsc::Receiver<ShardMessage>, shutdown: CancellationToken) {
        info!("Shard actor started");

        loop {
            let flush_at = self.state.flush_deadline_ms().map(|ms| self.clock.instant_at(ms));
            let alarm_at = self.clock.instant_at(self.state.next_alarm_ms());

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping shard");
                    break;
                }

                msg = rx.recv() => {
                    match msg {
                        Some(ShardMessage::Shutdown) => {
                            info!("Shutdown message received");
                            break;
                        }
                        Some(msg) => self.handle_message(msg).await,
                        None => {
                            info!("Message channel closed");
                            break;
                        }
                    }
                }

                _ = async {
                    match flush_at {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                } => {
                    self.flush_pending().await;
                }

                _ = tokio::time::sleep_until(alarm_at) => {
                    self.on_alarm().await;
                }

                Some(joined) = self.deliveries.join_next(), if !self.deliveries.is_empty() => {
                    self.on_delivered(joined).await;
                }
            }
        }

        // Requests already queued were accepted by the registry; serve them.
        rx.close();
        while let Some(msg) = rx.recv().await {
            if !matches!(msg, ShardMessage::Shutdown) {
                self.handle_message(msg).await;
            }
        }

        self.drain().await;
        info!("Shard actor stopped");
    }

    async fn handle_message(&mut self, msg: ShardMessage) {
        let now = self.clock.now_ms();
        match msg {
            ShardMessage::Add { event, reply } => match self.state.add(event, now) {
                Ok(ready) => {
                    let _ = reply.send(Ok(()));
                    self.launch_all(ready);
                    self.persist_if_due().await;
                }
                Err(e) => {
                    debug!(error = %e, "Refusing event");
                    let _ = reply.send(Err(e));
                }
            },
            ShardMessage::Check { id, reply } => {
                let outcome = self.state.check(&id, now);
                debug!(webhook_id = %id, ?outcome, "Checked identifier");
                let _ = reply.send(outcome);
                self.persist_if_due().await;
            }
            ShardMessage::Report { reply } => {
                let _ = reply.send(self.state.report(now));
            }
            ShardMessage::Shutdown => {}
        }
    }

    async fn flush_pending(&mut self) {
        let ready = self.state.flush(self.clock.now_ms());
        self.launch_all(ready);
        self.persist_if_due().await;
    }

    fn launch_all(&mut self, batches: impl IntoIterator<Item = ReadyBatch>) {
        for batch in batches {
            let sink = Arc::clone(&self.sink);
            let started = Instant::now();
            self.deliveries.spawn(async move {
                let outcome = deliver(&*sink, &batch.events).await;
                Delivered {
                    processing_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    outcome,
                }
            });
        }
    }

    async fn on_delivered(&mut self, joined: Result<Delivered, JoinError>) {
        let (processing_ms, outcome) = match joined {
            Ok(done) => (done.processing_ms, done.outcome),
            Err(e) => {
                error!(error = %e, "Delivery task failed, batch lost");
                (
                    0,
                    DeliveryOutcome {
                        batch_failed: true,
                        failed_events: 0,
                    },
                )
            }
        };
        let ready = self.state.complete(processing_ms, outcome, self.clock.now_ms());
        self.launch_all(ready);
        self.persist_if_due().await;
    }

    async fn on_alarm(&mut self) {
        let removed = self.state.on_alarm(self.clock.now_ms());
        debug!(removed, seen = self.state.seen().len(), "Alarm fired");
        self.flush_to_storage(true).await;
    }

    async fn persist_if_due(&mut self) {
        if self.state.persistence_due(self.clock.now_ms()) {
            self.flush_to_storage(false).await;
        }
    }

    /// Writes the seen-ID map; failures are retried at the next trigger.
    async fn flush_to_storage(&mut self, force: bool) {
        let Some(record) = self.state.persistence_record(force) else {
            return;
        };
        let shard = self.state.shard();
        match save_seen_ids(&*self.store, shard, &record).await {
            Ok(()) => {
                debug!(entries = record.entries.len(), "Persisted seen-ID map");
                self.state.persist_succeeded(self.clock.now_ms());
            }
            Err(e) => {
                warn!(error = %e, "Failed to persist seen-ID map, will retry");
            }
        }
    }

    /// Flushes the pending batch, waits for every batch to finish, persists.
    async fn drain(&mut self) {
        let ready = self.state.flush(self.clock.now_ms());
        self.launch_all(ready);

        while let Some(joined) = self.deliveries.join_next().await {
            self.on_delivered(joined).await;
        }

        if !self.state.is_idle() {
            error!(
                queued = self.state.queued(),
                in_flight = self.state.in_flight(),
                "Shard stopped with undelivered batches"
            );
        }
        self.flush_to_storage(false).await;
    }
}

/// Sends a batch downstream, falling back to one event at a time.
async fn deliver<Q: EventSink>(sink: &Q, events: &[Event]) -> DeliveryOutcome {
    let mut outcome = DeliveryOutcome::default();
    if events.is_empty() {
        return outcome;
    }

    if let Err(e) = sink.send_batch(events).await {
        warn!(error = %e, size = events.len(), "Batch send failed, retrying events individually");
        outcome.batch_failed = true;
        for event in events {
            if let Err(e) = sink.send(event).await {
                outcome.failed_events += 1;
                error!(webhook_id = ?event.webhook_id(), error = %e, "Event delivery failed");
            }
        }
    }
    outcome
}
