//! Wire types exchanged with the key-issuance service, the backend-of-record,
//! and gateway callers.
//!
//! All types are serialised as JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request header that marks a body as an [`Envelope`] rather than plain JSON.
pub const ENCRYPTED_MARKER_HEADER: &str = "x-encrypted";

/// Value carried by [`ENCRYPTED_MARKER_HEADER`] when the body is enveloped.
pub const ENCRYPTED_MARKER_VALUE: &str = "1";

/// The five field names that must all be present for a JSON object to be
/// treated as a decryption candidate.
pub const ENVELOPE_FIELDS: [&str; 5] = ["key_id", "encrypted_key", "ciphertext", "iv", "tag"];

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One encrypted JSON payload plus everything needed to decrypt it.
///
/// `ciphertext`, `iv`, and `tag` are standard base64. `encrypted_key` is the
/// wrapped key exactly as the key-issuance service returned it and is opaque
/// to this layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Identifier correlating this envelope with the key issued for it.
    pub key_id: String,
    /// Symmetric key wrapped by the key-issuance service.
    pub encrypted_key: String,
    /// AES-256-GCM ciphertext of the UTF-8 JSON plaintext, without the tag.
    pub ciphertext: String,
    /// 12-byte nonce.
    pub iv: String,
    /// 16-byte authentication tag.
    pub tag: String,
}

/// Returns `true` if `value` is an object carrying all of [`ENVELOPE_FIELDS`].
///
/// This is a presence check only. Field types and encodings are not examined
/// here; a structurally matching object that is not a real envelope fails
/// later, at decryption time.
pub fn looks_like_envelope(value: &Value) -> bool {
    match value {
        Value::Object(map) => ENVELOPE_FIELDS.iter().all(|f| map.contains_key(*f)),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Key-issuance service
// ---------------------------------------------------------------------------

/// Response body of `GET /get-key/{key_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyResponse {
    /// Wrapped key to embed verbatim in the outgoing envelope.
    pub encrypted_key: String,
    /// Raw AES-256 key, standard base64.
    pub aes_key_b64: String,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error body returned to gateway callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"upstream_timeout"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
    /// Status code the backend answered with, when one was received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
    /// Raw backend body, carried when it could not be parsed as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            upstream_status: None,
            raw: None,
        }
    }

    /// Attach the backend's status code.
    pub fn with_upstream_status(mut self, status: u16) -> Self {
        self.upstream_status = Some(status);
        self
    }

    /// Attach the raw backend body.
    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: String,
    /// Whether every resource is encrypted (`ENCRYPT_RESOURCES=*`).
    pub encrypt_all: bool,
    /// Number of explicitly listed resources configured for request-body
    /// encryption.
    pub encrypted_resources: usize,
}
