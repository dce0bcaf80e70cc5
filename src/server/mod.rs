//! HTTP ingress.
//!
//! Accepts signed CRM webhooks, hands them to their shard actors, and
//! exposes aggregated metrics.
//!
//! # Endpoints
//!
//! - `POST /events` - Verifies and buffers an event (returns 200)
//! - `POST /check` - Legacy immediate duplicate check (200 fresh / 409 seen)
//! - `GET /metrics` - Aggregated shard metrics as JSON
//! - `GET /` - Liveness check

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::downstream::ChannelQueue;
use crate::metrics::MetricsSnapshot;
use crate::persistence::Store;
use crate::shard::ShardRegistry;
use crate::webhooks::SignatureVerifier;

pub mod events;
pub mod health;
pub mod metrics;

pub use events::{IngestError, check_handler, events_handler};
pub use health::health_handler;
pub use metrics::metrics_handler;

/// The registry type the server runs against.
pub type Registry = ShardRegistry<ChannelQueue, Store>;

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: Arc<Registry>,

    /// Parsed once at startup; never mutated.
    verifier: Arc<SignatureVerifier>,

    max_body_bytes: usize,

    metrics_ttl: Duration,

    started: Instant,

    /// Last aggregated snapshot and when it was taken.
    metrics_cache: Mutex<Option<(Instant, MetricsSnapshot)>>,
}

impl AppState {
    pub fn new(
        registry: Arc<Registry>,
        verifier: Arc<SignatureVerifier>,
        max_body_bytes: usize,
        metrics_ttl: Duration,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                registry,
                verifier,
                max_body_bytes,
                metrics_ttl,
                started: Instant::now(),
                metrics_cache: Mutex::new(None),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn verifier(&self) -> &SignatureVerifier {
        &self.inner.verifier
    }

    pub fn max_body_bytes(&self) -> usize {
        self.inner.max_body_bytes
    }

    pub fn metrics_ttl(&self) -> Duration {
        self.inner.metrics_ttl
    }

    /// Time since the state was created.
    pub fn uptime(&self) -> Duration {
        self.inner.started.elapsed()
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/events", post(events_handler))
        .route("/check", post(check_handler))
        .route("/metrics", get(metrics_handler))
        .route("/", get(health_handler))
        .with_state(app_state)
}
