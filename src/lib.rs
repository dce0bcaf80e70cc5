//! webhook-sieve - Signed CRM webhook ingestion with sharded deduplication.
//!
//! Events arrive over HTTP, are authenticated by a streaming RSA-SHA256
//! signature check, routed by identifier to one of 256 shard actors, and
//! deduplicated within a 24-hour window before being forwarded downstream in
//! adaptively sized batches.

pub mod config;
pub mod dedup;
pub mod downstream;
pub mod metrics;
pub mod persistence;
pub mod server;
pub mod shard;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod test_utils;
