//! Routing of events to lazily created shard actors.
//!
//! The registry maps each [`ShardId`] to the channel of its actor. An actor
//! is spawned the first time anything routes to its shard and lives until
//! shutdown. Different shards run concurrently; requests for one shard are
//! serialized by its actor.
//!
//! ```text
//!                                  ┌──────────────┐
//!                             ┌──► │  shard-0     │ ──┐
//! ┌──────────┐   ┌────────┐   │    └──────────────┘   │   ┌────────────────┐
//! │  ingress │ ─►│ route  │ ──┤          ...          ├─► │ downstream     │
//! └──────────┘   └────────┘   │    ┌──────────────┐   │   │ queue          │
//!                             └──► │  default     │ ──┘   └────────────────┘
//!                                  └──────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace};

use crate::downstream::EventSink;
use crate::metrics::ShardReport;
use crate::persistence::StateStore;
use crate::types::{Event, ShardId, WebhookId};

use super::ShardError;
use super::actor::ShardActor;
use super::config::ShardConfig;
use super::message::ShardMessage;
use super::router::shard_of;
use super::state::CheckOutcome;

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, ShardError>;

/// Channel buffer size for shard messages.
const SHARD_CHANNEL_BUFFER: usize = 256;

struct ShardHandle {
    tx: mpsc::Sender<ShardMessage>,
    task: JoinHandle<()>,
}

/// Owns every live shard actor.
pub struct ShardRegistry<Q, S> {
    config: Arc<ShardConfig>,
    sink: Arc<Q>,
    store: Arc<S>,
    shards: RwLock<HashMap<ShardId, ShardHandle>>,
    shutdown: CancellationToken,
}

impl<Q: EventSink, S: StateStore> ShardRegistry<Q, S> {
    pub fn new(config: ShardConfig, sink: Arc<Q>, store: Arc<S>) -> Self {
        Self::new_with_shutdown(config, sink, store, CancellationToken::new())
    }

    /// Creates a registry whose actors stop when `shutdown` is cancelled.
    pub fn new_with_shutdown(config: ShardConfig, sink: Arc<Q>, store: Arc<S>, shutdown: CancellationToken) -> Self {
        info!(
            max_seen_ids = config.max_seen_ids,
            max_queued_batches = config.max_queued_batches,
            overflow_policy = ?config.overflow_policy,
            "Creating shard registry"
        );
        ShardRegistry {
            config: Arc::new(config),
            sink,
            store,
            shards: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn config(&self) -> &ShardConfig {
        &self.config
    }

    /// Hands an event to its shard. Returns once the event is buffered.
    #[instrument(skip(self, event), fields(webhook_id = ?event.webhook_id()))]
    pub async fn add(&self, event: Event) -> Result<ShardId> {
        let shard = shard_of(event.webhook_id().as_ref());
        let (reply, rx) = oneshot::channel();
        self.send(shard, ShardMessage::Add { event, reply }).await?;
        rx.await.map_err(|_| ShardError::Unavailable(shard))??;
        Ok(shard)
    }

    /// Checks and records an identifier on its shard immediately.
    #[instrument(skip(self), fields(webhook_id = %id))]
    pub async fn check(&self, id: WebhookId) -> Result<CheckOutcome> {
        let shard = shard_of(Some(&id));
        let (reply, rx) = oneshot::channel();
        self.send(shard, ShardMessage::Check { id, reply }).await?;
        rx.await.map_err(|_| ShardError::Unavailable(shard))
    }

    /// Collects a report from every live shard.
    ///
    /// Shards that stop while being asked are skipped.
    pub async fn reports(&self) -> Vec<ShardReport> {
        let senders: Vec<(ShardId, mpsc::Sender<ShardMessage>)> = {
            let shards = self.shards.read().await;
            shards.iter().map(|(id, h)| (*id, h.tx.clone())).collect()
        };

        let mut reports = Vec::with_capacity(senders.len());
        for (shard, tx) in senders {
            let (reply, rx) = oneshot::channel();
            if tx.send(ShardMessage::Report { reply }).await.is_err() {
                trace!(shard = %shard, "Shard gone before report");
                continue;
            }
            if let Ok(report) = rx.await {
                reports.push(report);
            }
        }
        reports
    }

    async fn send(&self, shard: ShardId, msg: ShardMessage) -> Result<()> {
        let tx = self.get_or_spawn(shard).await?;
        tx.send(msg).await.map_err(|_| ShardError::Unavailable(shard))
    }

    /// Gets an existing shard's sender or spawns its actor.
    async fn get_or_spawn(&self, shard: ShardId) -> Result<mpsc::Sender<ShardMessage>> {
        {
            let shards = self.shards.read().await;
            if let Some(handle) = shards.get(&shard) {
                return Ok(handle.tx.clone());
            }
        }

        let mut shards = self.shards.write().await;

        // Double-check after acquiring write lock
        if let Some(handle) = shards.get(&shard) {
            return Ok(handle.tx.clone());
        }
        if self.shutdown.is_cancelled() {
            return Err(ShardError::Unavailable(shard));
        }

        debug!(shard = %shard, "Spawning shard actor");
        let (tx, rx) = mpsc::channel(SHARD_CHANNEL_BUFFER);
        let cancel = self.shutdown.child_token();
        let config = Arc::clone(&self.config);
        let sink = Arc::clone(&self.sink);
        let store = Arc::clone(&self.store);

        // Hydration happens inside the task; messages wait in the channel.
        let task = tokio::spawn(async move {
            let actor = ShardActor::hydrate(shard, config, sink, store).await;
            actor.run(rx, cancel).await;
        });

        shards.insert(
            shard,
            ShardHandle {
                tx: tx.clone(),
                task,
            },
        );
        Ok(tx)
    }

    /// Returns the number of live shards.
    pub async fn shard_count(&self) -> usize {
        self.shards.read().await.len()
    }

    pub async fn has_shard(&self, shard: ShardId) -> bool {
        self.shards.read().await.contains_key(&shard)
    }

    /// Stops every shard and waits for each to drain and persist.
    pub async fn shutdown_all(&self) {
        info!("Shutting down all shards");
        self.shutdown.cancel();

        let handles: Vec<(ShardId, ShardHandle)> = self.shards.write().await.drain().collect();
        for (shard, handle) in handles {
            let _ = handle.tx.send(ShardMessage::Shutdown).await;
            if let Err(e) = handle.task.await {
                error!(shard = %shard, error = %e, "Shard task failed");
            }
        }
        info!("All shards stopped");
    }
}
