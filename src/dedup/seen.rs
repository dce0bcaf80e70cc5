//! The per-shard map of recently seen webhook identifiers.
//!
//! Each entry records the epoch-millisecond time the identifier was last
//! accepted. An identifier is a duplicate while its timestamp is newer than
//! `now - window` (24 hours by default).
//!
//! # Pending Writes
//!
//! Identifiers accepted since the last successful persistence are tracked in
//! a separate set. The set drives the "enough has changed" persistence
//! trigger and lets the shard skip storage writes when nothing changed.
//!
//! # Bounded Memory
//!
//! The map has a ceiling. Expired entries are swept once occupancy passes 80%
//! of it; if the sweep cannot get below the ceiling, the oldest entries are
//! evicted until it fits.

use std::collections::{HashMap, HashSet};

use crate::types::WebhookId;

/// Default dedup window (24 hours), in milliseconds.
pub const DEFAULT_DEDUP_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// Default ceiling on tracked identifiers per shard.
pub const DEFAULT_MAX_SEEN_IDS: usize = 100_000;

/// Seen identifiers with their last-accepted timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenIds {
    entries: HashMap<WebhookId, i64>,
    pending_writes: HashSet<WebhookId>,
}

impl SeenIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the map from persisted entries. Nothing is pending afterwards.
    pub fn from_entries(entries: HashMap<WebhookId, i64>) -> Self {
        SeenIds {
            entries,
            pending_writes: HashSet::new(),
        }
    }

    /// Decides whether `id` is new at `now_ms` and records it if so.
    ///
    /// Returns `true` when the identifier was not seen after `cutoff_ms`; the
    /// entry is then stamped with `now_ms` and marked as a pending write.
    /// Returns `false` (and changes nothing) for a duplicate.
    ///
    /// This is the only place a shard records an identifier; the batched and
    /// the immediate `check` paths both go through it.
    pub fn observe(&mut self, id: &WebhookId, now_ms: i64, cutoff_ms: i64) -> bool {
        if let Some(&seen_at) = self.entries.get(id)
            && seen_at > cutoff_ms
        {
            return false;
        }
        self.entries.insert(id.clone(), now_ms);
        self.pending_writes.insert(id.clone());
        true
    }

    /// Returns whether `id` would be treated as a duplicate at `cutoff_ms`.
    pub fn is_duplicate(&self, id: &WebhookId, cutoff_ms: i64) -> bool {
        self.entries.get(id).is_some_and(|&seen_at| seen_at > cutoff_ms)
    }

    /// Removes entries last seen before `cutoff_ms`.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup(&mut self, cutoff_ms: i64) -> usize {
        let before = self.entries.len();
        let pending = &mut self.pending_writes;
        self.entries.retain(|id, seen_at| {
            let keep = *seen_at >= cutoff_ms;
            if !keep {
                pending.remove(id);
            }
            keep
        });
        before - self.entries.len()
    }

    /// Evicts the oldest entries until at most `max` remain.
    ///
    /// Returns the number of entries evicted.
    pub fn enforce_ceiling(&mut self, max: usize) -> usize {
        if self.entries.len() <= max {
            return 0;
        }
        let excess = self.entries.len() - max;
        let mut by_age: Vec<(i64, WebhookId)> = self
            .entries
            .iter()
            .map(|(id, &seen_at)| (seen_at, id.clone()))
            .collect();
        by_age.select_nth_unstable(excess - 1);
        for (_, id) in by_age.into_iter().take(excess) {
            self.entries.remove(&id);
            self.pending_writes.remove(&id);
        }
        excess
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &WebhookId) -> Option<i64> {
        self.entries.get(id).copied()
    }

    pub fn entries(&self) -> &HashMap<WebhookId, i64> {
        &self.entries
    }

    pub fn pending_writes(&self) -> usize {
        self.pending_writes.len()
    }

    /// Forgets pending writes after a successful persistence.
    pub fn clear_pending_writes(&mut self) {
        self.pending_writes.clear();
    }
}
