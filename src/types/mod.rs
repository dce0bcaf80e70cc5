//! Core domain types for the ingestion engine.

pub mod event;
pub mod ids;

pub use event::{Event, WEBHOOK_ID_FIELD};
pub use ids::{ShardId, WebhookId};
