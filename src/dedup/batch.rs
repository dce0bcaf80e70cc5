//! Deduplication of a flushed batch against itself and the seen-ID map.

use std::collections::HashSet;

use crate::types::Event;

use super::SeenIds;

/// Result of deduplicating one batch.
#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Events to forward downstream, in arrival order.
    pub unique: Vec<Event>,
    /// Events dropped as duplicates (within the batch or already seen).
    pub duplicates: usize,
}

/// Splits a batch into unique events and duplicates.
///
/// - Events without an identifier are always kept.
/// - Repeated identifiers within the batch collapse to the first occurrence.
/// - Identifiers seen after `now_ms - window_ms` are dropped; the rest are
///   recorded in `seen` at `now_ms`.
pub fn dedup_batch(events: Vec<Event>, seen: &mut SeenIds, now_ms: i64, window_ms: i64) -> DedupOutcome {
    let cutoff_ms = now_ms - window_ms;
    let mut in_batch = HashSet::new();
    let mut outcome = DedupOutcome {
        unique: Vec::with_capacity(events.len()),
        duplicates: 0,
    };

    for event in events {
        let Some(id) = event.webhook_id() else {
            outcome.unique.push(event);
            continue;
        };

        if !in_batch.insert(id.clone()) {
            outcome.duplicates += 1;
            continue;
        }

        if seen.observe(&id, now_ms, cutoff_ms) {
            outcome.unique.push(event);
        } else {
            outcome.duplicates += 1;
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::DEFAULT_DEDUP_WINDOW_MS;
    use crate::test_utils::{anonymous_event, event_with_id, ids_of};
    use crate::types::WebhookId;
    use serde_json::json;

    const WINDOW: i64 = DEFAULT_DEDUP_WINDOW_MS;

    #[test]
    fn anonymous_events_always_pass() {
        let mut seen = SeenIds::new();
        let batch = vec![anonymous_event(), anonymous_event()];

        let outcome = dedup_batch(batch, &mut seen, 1_000, WINDOW);

        assert_eq!(outcome.unique.len(), 2);
        assert_eq!(outcome.duplicates, 0);
        assert!(seen.is_empty());
    }

    #[test]
    fn within_batch_duplicates_keep_first_occurrence() {
        let mut seen = SeenIds::new();
        let first = Event::from_value(json!({ "webhookId": "a", "n": 1 }));
        let second = Event::from_value(json!({ "webhookId": "a", "n": 2 }));

        let outcome = dedup_batch(vec![first.clone(), second], &mut seen, 1_000, WINDOW);

        assert_eq!(outcome.unique, vec![first]);
        assert_eq!(outcome.duplicates, 1);
    }

    #[test]
    fn previously_seen_ids_are_dropped() {
        let mut seen = SeenIds::new();
        dedup_batch(vec![event_with_id("a")], &mut seen, 1_000, WINDOW);

        let outcome = dedup_batch(
            vec![event_with_id("a"), event_with_id("b")],
            &mut seen,
            2_000,
            WINDOW,
        );

        assert_eq!(ids_of(&outcome.unique), vec![WebhookId::new("b")]);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(seen.get(&WebhookId::new("a")), Some(1_000));
        assert_eq!(seen.get(&WebhookId::new("b")), Some(2_000));
    }

    #[test]
    fn expired_ids_are_forwarded_again() {
        let mut seen = SeenIds::new();
        dedup_batch(vec![event_with_id("a")], &mut seen, 1_000, WINDOW);

        let outcome = dedup_batch(vec![event_with_id("a")], &mut seen, 1_000 + WINDOW + 1, WINDOW);

        assert_eq!(outcome.unique.len(), 1);
        assert_eq!(outcome.duplicates, 0);
    }

    #[test]
    fn order_is_preserved() {
        let mut seen = SeenIds::new();
        let batch = vec![
            event_with_id("c"),
            anonymous_event(),
            event_with_id("a"),
            event_with_id("c"),
            event_with_id("b"),
        ];

        let outcome = dedup_batch(batch, &mut seen, 1_000, WINDOW);

        assert_eq!(
            ids_of(&outcome.unique),
            vec![WebhookId::new("c"), WebhookId::new("a"), WebhookId::new("b")]
        );
        assert_eq!(outcome.unique.len(), 4);
    }
}
