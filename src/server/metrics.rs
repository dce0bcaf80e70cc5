//! Metrics endpoint.
//!
//! Aggregating asks every live shard for a report, so the result is cached
//! for a short TTL. Concurrent requests during a refresh wait on the cache
//! lock and then reuse the fresh snapshot.

use axum::Json;
use axum::extract::State;
use tokio::time::Instant;
use tracing::trace;

use super::AppState;
use crate::metrics::{MetricsSnapshot, aggregate};

/// Metrics handler.
///
/// # Response
///
/// 200 OK with a [`MetricsSnapshot`] as camelCase JSON.
///
/// ```ignore
/// GET /metrics HTTP/1.1
///
/// HTTP/1.1 200 OK
///
/// {"totalWebhooks": 1500, "processedBatches": 12, "deduplicated": 3, ...}
/// ```
pub async fn metrics_handler(State(app_state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(current_snapshot(&app_state).await)
}

/// Returns the cached snapshot, refreshing it once it is older than the TTL.
pub async fn current_snapshot(app_state: &AppState) -> MetricsSnapshot {
    let mut cache = app_state.inner.metrics_cache.lock().await;
    if let Some((taken, snapshot)) = cache.as_ref()
        && taken.elapsed() < app_state.metrics_ttl()
    {
        trace!("Serving cached metrics");
        return snapshot.clone();
    }

    let reports = app_state.registry().reports().await;
    let snapshot = aggregate(&reports, app_state.uptime().as_secs_f64());
    *cache = Some((Instant::now(), snapshot.clone()));
    snapshot
}
