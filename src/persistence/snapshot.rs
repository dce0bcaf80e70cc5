//! The persisted form of a shard's seen-ID map.
//!
//! # Record Format
//!
//! One record per shard, stored under [`ShardId::storage_key`]:
//!
//! ```json
//! { "schema_version": 1, "saved_at": "2024-05-01T12:00:00Z", "entries": { "wh_1": 1714564800000 } }
//! ```
//!
//! Every flush replaces the whole record, so a shard's durable state is
//! always a consistent copy of its map at one instant.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dedup::SeenIds;
use crate::types::{ShardId, WebhookId};

use super::{Result, StateStore, StoreError};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Serialized seen-ID map for one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSeenIds {
    /// Schema version for forward-compatible migrations.
    pub schema_version: u32,

    /// When the record was written.
    pub saved_at: DateTime<Utc>,

    /// Identifier → last-accepted epoch milliseconds.
    pub entries: HashMap<WebhookId, i64>,
}

impl PersistedSeenIds {
    /// Captures the current contents of `seen`.
    pub fn capture(seen: &SeenIds) -> Self {
        PersistedSeenIds {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            entries: seen.entries().clone(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a record, rejecting incompatible schema versions.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let record: PersistedSeenIds = serde_json::from_slice(bytes)?;
        if record.schema_version != SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                got: record.schema_version,
            });
        }
        Ok(record)
    }

    pub fn into_seen_ids(self) -> SeenIds {
        SeenIds::from_entries(self.entries)
    }
}

/// Loads a shard's seen-ID map, or `None` if it was never persisted.
pub async fn load_seen_ids<S: StateStore>(store: &S, shard: ShardId) -> Result<Option<SeenIds>> {
    let Some(bytes) = store.get(&shard.storage_key()).await? else {
        return Ok(None);
    };
    Ok(Some(PersistedSeenIds::from_bytes(&bytes)?.into_seen_ids()))
}

/// Writes a previously captured record for a shard.
pub async fn save_seen_ids<S: StateStore>(store: &S, shard: ShardId, record: &PersistedSeenIds) -> Result<()> {
    store.put(&shard.storage_key(), record.to_bytes()?).await
}
