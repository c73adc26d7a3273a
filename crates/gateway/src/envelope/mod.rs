//! Envelope encryption of outbound JSON bodies and best-effort decryption of
//! inbound ones.
//!
//! # Wire framing
//!
//! ```text
//! { "key_id":        <minted id>,
//!   "encrypted_key": <wrapped key, verbatim from the key service>,
//!   "ciphertext":    base64(AES-256-GCM(utf8 json)),
//!   "iv":            base64(12 random bytes),
//!   "tag":           base64(16-byte tag) }
//! ```
//!
//! # Error policy
//!
//! - Encryption errors are fatal to the request: a body that was meant to be
//!   enveloped is never sent in the clear.
//! - Decryption errors are recovered by passing the original value through.

pub mod decryptor;
pub mod encryptor;

pub use decryptor::{Decrypted, ResponseDecryptor};
pub use encryptor::PayloadEncryptor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::Envelope;
use thiserror::Error;

use crate::crypto::{CipherError, SealedPayload};
use crate::keys::{IssuedKey, KeyServiceError};

/// Errors produced while sealing or opening an [`Envelope`].
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The key-issuance service failed.
    #[error(transparent)]
    KeyService(#[from] KeyServiceError),

    /// The ciphertext did not authenticate under the fetched key.
    #[error("authentication tag verification failed")]
    AeadVerification,

    /// An envelope-shaped value carries fields that cannot be decoded, or its
    /// plaintext is not UTF-8 JSON.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The outbound plaintext could not be serialised.
    #[error("failed to serialise payload: {0}")]
    Serialization(#[source] serde_json::Error),

    /// The cipher rejected an encryption.
    #[error("encryption failed: {0}")]
    Cipher(#[source] CipherError),
}

/// Frame a sealed payload and its issued key as a wire [`Envelope`].
pub(crate) fn frame(issued: IssuedKey, sealed: &SealedPayload) -> Envelope {
    Envelope {
        key_id: issued.key_id,
        encrypted_key: issued.wrapped_key,
        ciphertext: STANDARD.encode(&sealed.ciphertext),
        iv: STANDARD.encode(sealed.iv),
        tag: STANDARD.encode(sealed.tag),
    }
}

/// Decode the base64 fields of an [`Envelope`].
pub(crate) fn unframe(envelope: &Envelope) -> Result<SealedPayload, EnvelopeError> {
    let ciphertext = decode_field("ciphertext", &envelope.ciphertext)?;
    let iv = decode_field("iv", &envelope.iv)?;
    let tag = decode_field("tag", &envelope.tag)?;
    SealedPayload::from_parts(&iv, ciphertext, &tag)
        .map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))
}

fn decode_field(name: &str, encoded: &str) -> Result<Vec<u8>, EnvelopeError> {
    STANDARD
        .decode(encoded)
        .map_err(|_| EnvelopeError::MalformedEnvelope(format!("{name} is not valid base64")))
}
