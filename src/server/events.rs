//! Event ingestion endpoints.
//!
//! Both endpoints stream the body through the signature verifier before
//! anything is parsed, then hand the event to its shard. Deduplication and
//! delivery happen after the response; callers only ever learn about
//! authentication, parsing and availability problems.

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use super::AppState;
use crate::shard::{CheckOutcome, ShardError};
use crate::types::{Event, WEBHOOK_ID_FIELD};
use crate::webhooks::{SIGNATURE_HEADER, VerifyError};

/// Errors that can occur while ingesting an event.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Shard(#[from] ShardError),

    /// The legacy check path needs an identifier to check.
    #[error("payload has no webhookId")]
    MissingWebhookId,
}

impl IngestError {
    fn kind(&self) -> &'static str {
        match self {
            IngestError::Verify(VerifyError::MissingSignature) => "missing_signature",
            IngestError::Verify(VerifyError::InvalidSignature) => "invalid_signature",
            IngestError::Verify(VerifyError::Oversized { .. }) => "payload_too_large",
            IngestError::Verify(VerifyError::Body(_)) => "body_read_failed",
            IngestError::Verify(VerifyError::Malformed(_)) => "malformed_payload",
            IngestError::Verify(VerifyError::InvalidKey(_)) => "internal",
            IngestError::Shard(ShardError::Overloaded(_)) => "overloaded",
            IngestError::Shard(ShardError::Unavailable(_)) => "unavailable",
            IngestError::MissingWebhookId => "missing_webhook_id",
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match &self {
            IngestError::Verify(VerifyError::MissingSignature | VerifyError::InvalidSignature) => {
                StatusCode::UNAUTHORIZED
            }
            IngestError::Verify(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IngestError::Shard(ShardError::Overloaded(_)) => StatusCode::SERVICE_UNAVAILABLE,
            IngestError::Shard(ShardError::Unavailable(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            IngestError::MissingWebhookId => StatusCode::BAD_REQUEST,
        };

        let body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// Event ingestion handler.
///
/// # Request
///
/// - Method: POST
/// - Header `x-wh-signature`: base64 RSA-SHA256 signature of the raw body
/// - Body: JSON event payload
///
/// # Response
///
/// - 200 OK once the event is buffered by its shard
/// - 401 Unauthorized: missing or invalid signature
/// - 500 Internal Server Error: oversized body, read failure, malformed JSON,
///   shard unavailable
/// - 503 Service Unavailable: the shard is refusing work
///
/// # Example
///
/// ```ignore
/// POST /events HTTP/1.1
/// X-Wh-Signature: kq3N...==
/// Content-Type: application/json
///
/// {"webhookId": "wh_123", "type": "ContactCreate", ...}
///
/// HTTP/1.1 200 OK
///
/// {"message": "Webhook received", "success": true, "webhookId": "wh_123"}
/// ```
pub async fn events_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<Value>, IngestError> {
    let event = read_verified(&app_state, &headers, body).await?;
    // Echoed exactly as sent, whatever its JSON type.
    let webhook_id = event.payload().get(WEBHOOK_ID_FIELD).cloned().unwrap_or(Value::Null);

    let shard = app_state.registry().add(event).await?;
    debug!(webhook_id = %webhook_id, shard = %shard, "Webhook received");

    Ok(Json(json!({
        "message": "Webhook received",
        "success": true,
        "webhookId": webhook_id,
    })))
}

/// Immediate duplicate check (legacy path).
///
/// Records the identifier on its shard and answers whether it had been seen
/// within the dedup window: 200 with `"duplicate": false` when fresh, 409
/// with `"duplicate": true` otherwise. The event itself is not forwarded.
pub async fn check_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<Value>), IngestError> {
    let event = read_verified(&app_state, &headers, body).await?;
    let webhook_id = event.webhook_id().ok_or(IngestError::MissingWebhookId)?;

    let outcome = app_state.registry().check(webhook_id.clone()).await?;
    let (status, duplicate) = match outcome {
        CheckOutcome::Fresh => (StatusCode::OK, false),
        CheckOutcome::Duplicate => (StatusCode::CONFLICT, true),
    };
    debug!(webhook_id = %webhook_id, duplicate, "Checked webhook");

    Ok((
        status,
        Json(json!({
            "duplicate": duplicate,
            "webhookId": webhook_id,
        })),
    ))
}

/// Streams the body through the verifier and returns the parsed event.
async fn read_verified(app_state: &AppState, headers: &HeaderMap, mut body: Body) -> Result<Event, IngestError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    let result = async {
        let mut verification = app_state
            .verifier()
            .begin(signature, app_state.max_body_bytes())?;

        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(|e| VerifyError::Body(e.to_string()))?;
            if let Ok(chunk) = frame.into_data() {
                verification.update(&chunk)?;
            }
        }
        verification.finish()
    }
    .await;

    result.map_err(|e| {
        match &e {
            VerifyError::MissingSignature | VerifyError::InvalidSignature => {
                warn!(error = %e, "Rejecting unauthenticated webhook");
            }
            _ => debug!(error = %e, "Rejecting webhook"),
        }
        IngestError::from(e)
    })
}
