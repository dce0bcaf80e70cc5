//! CRM webhook signature verification using RSA-SHA256.
//!
//! The platform signs the raw request body with its private key (PKCS#1 v1.5
//! over SHA-256) and sends the base64 signature in the `x-wh-signature`
//! header. Verification is streaming: body chunks are hashed as they arrive,
//! so verification never waits for the whole body to be buffered, and a body
//! that grows past the size ceiling is rejected mid-stream.
//!
//! Signature verification is the first step in webhook processing. JSON is
//! only parsed once the signature is known to be valid, so forged traffic
//! costs a hash and nothing more.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rsa::RsaPublicKey;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::DigestVerifier;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::Event;

/// Header carrying the base64 RSA-SHA256 signature.
pub const SIGNATURE_HEADER: &str = "x-wh-signature";

/// Default ceiling on streamed body size (100 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

/// The CRM platform's published webhook signing key.
pub const DEFAULT_PUBLIC_KEY_PEM: &str = "-----BEGIN PUBLIC KEY-----
MIICIjANBgkqhkiG9w0BAQEFAAOCAg8AMIICCgKCAgEAokvo/r9tVgcfZ5DysOSC
Frm602qYV0MaAiNnX9O8KxMbiyRKWeL9JpCpVpt4XHIcBOK4u3cLSqJGOLaPuXw6
dO0t6Q/ZVdAV5Phz+ZtzPL16iCGeK9po6D6JHBpbi989mmzMryUnQJezlYJ3DVfB
csedpinheNnyYeFXolrJvcsjDtfAeRx5ByHQmTnSdFUzuAnC9/GepgLT9SM4nCpv
uxmZMxrJt5Rw+VUaQ9B8JSvbMPpez4peKaJPZHBbU3OdeCVx5klVXXZQGNHOs8gF
3kvoV5rTnXV0IknLBXlcKKAQLZcY/Q9rG6Ifi9c+5vqlvHPCUJFT5XUGG5RKgOKU
J062fRtN+rLYZUV+BjafxQauvC8wSWeYja63VSUruvmNj8xkx2zE/Juc+yjLjTXp
IocmaiFeAO6fUtNjDeFVkhf5LNb59vECyrHD2SQIrhgXpO4Q3dVNA5rw576PwTzN
h/AMfHKIjE4xQA1SZuYJmNnmVZLIZBlQAF9Ntd03rfadZ+yDiOXCCs9FkHibELhC
HULgCsnuDJHcrGNd5/Ddm5hxGQ0ASitgHeMZ0kcIOwKDOzOU53lDza6/Y09T7sYJ
PQe7z0cvj7aE4B+Ax1ZoZGPzpJlZtGXCsu9aTEGEnKzmsFqwcSsnw3JB31IGKAyk
T1hhTiaCeIY/OwwwNUY2yvcCAwEAAQ==
-----END PUBLIC KEY-----";

/// Errors that can occur while verifying a webhook.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The signature header was absent.
    #[error("missing signature header")]
    MissingSignature,

    /// The signature did not decode or did not match the body.
    #[error("invalid signature")]
    InvalidSignature,

    /// The body grew past the configured ceiling while streaming.
    #[error("request body too large: more than {limit} bytes")]
    Oversized { limit: usize },

    /// Reading the request body failed.
    #[error("failed to read request body: {0}")]
    Body(String),

    /// The signature was valid but the body is not a JSON document.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The configured public key could not be parsed.
    #[error("invalid public key: {0}")]
    InvalidKey(String),
}

/// Verifies webhook signatures against a fixed public key.
///
/// Built once at startup and shared by reference; the parsed key is never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    key: VerifyingKey<Sha256>,
}

impl SignatureVerifier {
    /// Parses a PEM-encoded (SPKI) RSA public key.
    pub fn from_pem(pem: &str) -> Result<Self, VerifyError> {
        let public_key = RsaPublicKey::from_public_key_pem(pem.trim())
            .map_err(|e| VerifyError::InvalidKey(e.to_string()))?;
        Ok(SignatureVerifier {
            key: VerifyingKey::new(public_key),
        })
    }

    /// Builds a verifier for the compiled-in platform key.
    pub fn platform_default() -> Result<Self, VerifyError> {
        Self::from_pem(DEFAULT_PUBLIC_KEY_PEM)
    }

    /// Starts a streaming verification.
    ///
    /// Fails fast, before any body bytes are read, when the header is missing
    /// or is not valid base64.
    pub fn begin(
        &self,
        signature_header: Option<&str>,
        max_body_bytes: usize,
    ) -> Result<StreamingVerification<'_>, VerifyError> {
        let header = signature_header.ok_or(VerifyError::MissingSignature)?;
        let raw = STANDARD
            .decode(header.trim())
            .map_err(|_| VerifyError::InvalidSignature)?;
        let signature =
            Signature::try_from(raw.as_slice()).map_err(|_| VerifyError::InvalidSignature)?;

        Ok(StreamingVerification {
            verifier: self,
            signature,
            hasher: Sha256::new(),
            body: Vec::new(),
            limit: max_body_bytes,
        })
    }

    /// Verifies a fully buffered body in one call.
    pub fn verify(
        &self,
        signature_header: Option<&str>,
        body: &[u8],
        max_body_bytes: usize,
    ) -> Result<Event, VerifyError> {
        let mut verification = self.begin(signature_header, max_body_bytes)?;
        verification.update(body)?;
        verification.finish()
    }
}

/// An in-progress verification of a streamed body.
///
/// Chunks are fed to the SHA-256 hasher as they arrive and retained so the
/// body can be parsed once the signature checks out.
pub struct StreamingVerification<'a> {
    verifier: &'a SignatureVerifier,
    signature: Signature,
    hasher: Sha256,
    body: Vec<u8>,
    limit: usize,
}

impl StreamingVerification<'_> {
    /// Feeds the next body chunk.
    pub fn update(&mut self, chunk: &[u8]) -> Result<(), VerifyError> {
        if self.body.len() + chunk.len() > self.limit {
            return Err(VerifyError::Oversized { limit: self.limit });
        }
        self.hasher.update(chunk);
        self.body.extend_from_slice(chunk);
        Ok(())
    }

    /// Bytes received so far.
    pub fn received(&self) -> usize {
        self.body.len()
    }

    /// Checks the signature and, only if it matches, parses the body.
    pub fn finish(self) -> Result<Event, VerifyError> {
        self.verifier
            .key
            .verify_digest(self.hasher, &self.signature)
            .map_err(|_| VerifyError::InvalidSignature)?;

        // serde_json validates UTF-8 while parsing.
        Ok(Event::from_slice(&self.body)?)
    }
}
