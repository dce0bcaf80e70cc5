//! Durable storage for shard state.
//!
//! Shards persist through a small key-value collaborator, [`StateStore`],
//! with `get` and `put` of whole records. Two backends exist:
//!
//! - [`FileStore`]: one JSON file per key, written atomically with fsync
//! - [`MemoryStore`]: a shared map, used when no state directory is configured
//!
//! [`Store`] selects between them at startup so the rest of the service is
//! written against one concrete type.
//!
//! # Module Structure
//!
//! - [`fsync`]: file and directory sync helpers
//! - [`file`]: crash-safe file backend
//! - [`memory`]: in-memory backend with failure injection
//! - [`snapshot`]: the persisted seen-ID record and its schema check

use std::future::Future;
use std::io;

use thiserror::Error;

pub mod file;
pub mod fsync;
pub mod memory;
pub mod snapshot;

pub use file::FileStore;
pub use fsync::{fsync_dir, fsync_file};
pub use memory::MemoryStore;
pub use snapshot::{PersistedSeenIds, SCHEMA_VERSION, load_seen_ids, save_seen_ids};

/// Errors from storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema version mismatch.
    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },

    /// Key that would resolve outside the store.
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),

    /// Blocking storage task panicked or was cancelled.
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Backend refused the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Key-value storage for whole records.
///
/// `put` replaces any previous value for the key.
pub trait StateStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    fn put(&self, key: &str, value: Vec<u8>) -> impl Future<Output = Result<()>> + Send;
}

/// The backend chosen from configuration.
#[derive(Debug, Clone)]
pub enum Store {
    File(FileStore),
    Memory(MemoryStore),
}

impl StateStore for Store {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send {
        async move {
            match self {
                Store::File(store) => store.get(key).await,
                Store::Memory(store) => store.get(key).await,
            }
        }
    }

    fn put(&self, key: &str, value: Vec<u8>) -> impl Future<Output = Result<()>> + Send {
        async move {
            match self {
                Store::File(store) => store.put(key, value).await,
                Store::Memory(store) => store.put(key, value).await,
            }
        }
    }
}
