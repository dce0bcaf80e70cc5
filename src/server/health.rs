//! Liveness endpoint.

use axum::Json;
use serde_json::{Value, json};

/// Health check handler.
///
/// Returns `{"status": "ok"}` whenever the server is accepting connections.
pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
