//! In-memory key-value store.
//!
//! Used when no state directory is configured and throughout the tests.
//! Writes can be made to fail on demand to exercise the retry-on-next-trigger
//! path of shard persistence.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{Result, StateStore, StoreError};

#[derive(Debug, Default)]
struct Inner {
    records: Mutex<HashMap<String, Vec<u8>>>,
    fail_puts: AtomicBool,
    puts: AtomicUsize,
}

/// A cloneable handle to a shared in-memory map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `put` calls fail (or succeed again).
    pub fn set_fail_puts(&self, fail: bool) {
        self.inner.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `put` calls so far.
    pub fn put_count(&self) -> usize {
        self.inner.puts.load(Ordering::SeqCst)
    }

    /// Reads a record without going through the async trait.
    pub fn snapshot(&self, key: &str) -> Option<Vec<u8>> {
        self.inner
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Writes a record directly, bypassing failure injection.
    pub fn seed(&self, key: impl Into<String>, value: Vec<u8>) {
        self.inner
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send {
        let value = self.snapshot(key);
        async move { Ok(value) }
    }

    fn put(&self, key: &str, value: Vec<u8>) -> impl Future<Output = Result<()>> + Send {
        let result = if self.inner.fail_puts.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(format!("write to {key} refused")))
        } else {
            self.seed(key, value);
            self.inner.puts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        async move { result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_and_get() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.put("k", b"v".to_vec()).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn clones_share_records() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.put("k", b"v".to_vec()).await.unwrap();
        assert_eq!(other.snapshot("k"), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn injected_failures_leave_records_untouched() {
        let store = MemoryStore::new();
        store.seed("k", b"old".to_vec());
        store.set_fail_puts(true);

        assert!(store.put("k", b"new".to_vec()).await.is_err());
        assert_eq!(store.snapshot("k"), Some(b"old".to_vec()));
        assert_eq!(store.put_count(), 0);

        store.set_fail_puts(false);
        store.put("k", b"new".to_vec()).await.unwrap();
        assert_eq!(store.snapshot("k"), Some(b"new".to_vec()));
    }
}
