//! Consistent-hash routing from webhook identifiers to shards.
//!
//! The shard count is fixed, so routing is a pure function of the identifier:
//! the same identifier maps to the same shard in every process and across
//! restarts, and there is no routing state to persist.
//!
//! # Formula
//!
//! `u32_be(sha1(id)[0..4]) % 256`, formatted as `shard-<n>`. Events with no
//! identifier go to the `default` shard.

use sha1::{Digest, Sha1};

use crate::types::{ShardId, WebhookId};

/// Number of indexed shards.
pub const SHARD_COUNT: u32 = 256;

/// Returns the shard an identifier routes to.
pub fn shard_of(webhook_id: Option<&WebhookId>) -> ShardId {
    match webhook_id {
        None => ShardId::Default,
        Some(id) => ShardId::Index(shard_index(id)),
    }
}

fn shard_index(id: &WebhookId) -> u16 {
    let digest = Sha1::digest(id.as_str().as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (prefix % SHARD_COUNT) as u16
}
