//! Newtype wrappers for domain identifiers.
//!
//! These keep webhook identifiers and shard names from being mixed up with
//! arbitrary strings, and make routing and storage keys self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The unique identifier the CRM platform attaches to a webhook (`webhookId`).
///
/// Retries and near-duplicate deliveries of the same logical event carry the
/// same identifier, which is what deduplication keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebhookId(pub String);

impl WebhookId {
    pub fn new(s: impl Into<String>) -> Self {
        WebhookId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WebhookId {
    fn from(s: String) -> Self {
        WebhookId(s)
    }
}

impl From<&str> for WebhookId {
    fn from(s: &str) -> Self {
        WebhookId(s.to_string())
    }
}

/// An addressable shard.
///
/// Events with an identifier hash onto one of the indexed shards; events
/// without one all land on the `default` shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShardId {
    Default,
    Index(u16),
}

impl ShardId {
    /// Returns the stable shard name (`default` or `shard-<n>`).
    pub fn name(&self) -> String {
        self.to_string()
    }

    /// Storage key under which this shard's seen-ID map is persisted.
    pub fn storage_key(&self) -> String {
        format!("{}/seen-ids", self)
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardId::Default => write!(f, "default"),
            ShardId::Index(n) => write!(f, "shard-{}", n),
        }
    }
}
