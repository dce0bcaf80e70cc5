//! Shared test helpers: fixture signing keys and event builders.

use std::sync::OnceLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use proptest::prelude::*;
use rsa::RsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use serde_json::json;
use sha2::Sha256;

use crate::types::{Event, WebhookId};
use crate::webhooks::SignatureVerifier;

const SIGNING_KEY_PEM: &str = include_str!("../tests/fixtures/signing_key.pem");
const VERIFYING_KEY_PEM: &str = include_str!("../tests/fixtures/verifying_key.pem");

fn signing_key() -> &'static SigningKey<Sha256> {
    static KEY: OnceLock<SigningKey<Sha256>> = OnceLock::new();
    KEY.get_or_init(|| {
        let private = RsaPrivateKey::from_pkcs8_pem(SIGNING_KEY_PEM).unwrap();
        SigningKey::new(private)
    })
}

/// Verifier for the fixture key pair.
pub fn test_verifier() -> SignatureVerifier {
    SignatureVerifier::from_pem(VERIFYING_KEY_PEM).unwrap()
}

/// Signs a body with the fixture key, returning the base64 header value.
pub fn sign_body(body: &[u8]) -> String {
    let signature = signing_key().sign(body);
    STANDARD.encode(signature.to_bytes())
}

/// An event with the given `webhookId`.
pub fn event_with_id(id: &str) -> Event {
    Event::from_value(json!({
        "webhookId": id,
        "type": "ContactCreate",
        "locationId": "loc_1",
    }))
}

/// An event with no `webhookId`.
pub fn anonymous_event() -> Event {
    Event::from_value(json!({ "type": "ContactCreate", "locationId": "loc_1" }))
}

/// Collects the identifiers of a list of events (anonymous ones skipped).
pub fn ids_of(events: &[Event]) -> Vec<WebhookId> {
    events.iter().filter_map(Event::webhook_id).collect()
}

pub fn arb_webhook_id() -> impl Strategy<Value = WebhookId> {
    "[a-zA-Z0-9_-]{1,40}".prop_map(WebhookId::new)
}
