//! Webhook authentication for CRM platform events.
//!
//! This module provides streaming RSA-SHA256 signature verification over the
//! raw request body.

pub mod signature;

pub use signature::{
    DEFAULT_MAX_BODY_BYTES, DEFAULT_PUBLIC_KEY_PEM, SIGNATURE_HEADER, SignatureVerifier,
    StreamingVerification, VerifyError,
};
