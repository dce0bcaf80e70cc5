//! Inbound webhook events.
//!
//! An [`Event`] wraps the verified JSON payload unchanged. The only field the
//! engine interprets is `webhookId`; everything else (event type, location
//! and company identifiers, timestamps) is forwarded opaquely.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::WebhookId;

/// Payload field carrying the deduplication identifier.
pub const WEBHOOK_ID_FIELD: &str = "webhookId";

/// A verified webhook event.
///
/// Immutable once constructed. Carries an approximate byte size used for
/// memory-pressure accounting in the shard's pending batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    payload: Value,
    size: usize,
}

impl Event {
    /// Parses an event from raw JSON bytes; the size is the raw length.
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        let payload = serde_json::from_slice(bytes)?;
        Ok(Event {
            payload,
            size: bytes.len(),
        })
    }

    /// Wraps an already-parsed payload, measuring its serialized length.
    pub fn from_value(payload: Value) -> Self {
        let size = serde_json::to_vec(&payload).map(|v| v.len()).unwrap_or(0);
        Event { payload, size }
    }

    /// Returns the event's `webhookId`, if it has a usable one.
    ///
    /// Non-empty strings are used as-is and numbers in their decimal form.
    /// Anything else (missing, null, empty, nested) means the event is
    /// anonymous and will not be deduplicated across batches.
    pub fn webhook_id(&self) -> Option<WebhookId> {
        match self.payload.get(WEBHOOK_ID_FIELD)? {
            Value::String(s) if !s.is_empty() => Some(WebhookId::new(s.as_str())),
            Value::Number(n) => Some(WebhookId::new(n.to_string())),
            _ => None,
        }
    }

    /// Approximate size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.payload.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Event::from_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_webhook_id_is_extracted() {
        let event = Event::from_value(json!({ "webhookId": "wh_123", "type": "ContactCreate" }));
        assert_eq!(event.webhook_id(), Some(WebhookId::new("wh_123")));
    }

    #[test]
    fn numeric_webhook_id_uses_decimal_form() {
        let event = Event::from_value(json!({ "webhookId": 42 }));
        assert_eq!(event.webhook_id(), Some(WebhookId::new("42")));
    }

    #[test]
    fn missing_empty_or_null_webhook_id_is_anonymous() {
        assert_eq!(Event::from_value(json!({ "type": "x" })).webhook_id(), None);
        assert_eq!(Event::from_value(json!({ "webhookId": "" })).webhook_id(), None);
        assert_eq!(Event::from_value(json!({ "webhookId": null })).webhook_id(), None);
        assert_eq!(
            Event::from_value(json!({ "webhookId": { "id": "x" } })).webhook_id(),
            None
        );
    }

    #[test]
    fn non_object_payload_is_anonymous() {
        assert_eq!(Event::from_value(json!([1, 2, 3])).webhook_id(), None);
    }

    #[test]
    fn from_slice_records_raw_length() {
        let raw = br#"{ "webhookId" : "a",   "x": 1 }"#;
        let event = Event::from_slice(raw).unwrap();
        assert_eq!(event.size(), raw.len());
    }

    #[test]
    fn from_slice_rejects_invalid_json() {
        assert!(Event::from_slice(b"{not json").is_err());
    }

    #[test]
    fn serializes_as_bare_payload() {
        let payload = json!({ "webhookId": "a", "locationId": "loc" });
        let event = Event::from_value(payload.clone());
        assert_eq!(serde_json::to_value(&event).unwrap(), payload);
    }

    #[test]
    fn deserialize_measures_size() {
        let event: Event = serde_json::from_str(r#"{"webhookId":"a"}"#).unwrap();
        assert_eq!(event.size(), r#"{"webhookId":"a"}"#.len());
    }
}
