//! [`ResponseDecryptor`]: best-effort decryption of backend response bodies.
//!
//! The walk replaces every envelope it can open with its plaintext and leaves
//! everything else untouched:
//!
//! - a bare envelope object is opened in place;
//! - each element of a top-level array is opened independently, concurrently,
//!   with output order equal to input order;
//! - objects that are not envelopes, and scalars, pass through.
//!
//! With a non-zero nested depth the same rule is also applied to object field
//! values and nested arrays, down to that many extra levels.

use std::sync::Arc;

use common::{looks_like_envelope, Envelope};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{unframe, EnvelopeError};
use crate::crypto::{cipher, CipherError};
use crate::keys::KeyService;

/// Result of [`ResponseDecryptor::decrypt_response`].
#[derive(Debug, Clone, PartialEq)]
pub enum Decrypted {
    /// The body parsed as JSON. Every envelope that could be opened has been
    /// replaced by its plaintext.
    Json(Value),

    /// The body is not JSON. Carries the body text, lossily UTF-8 decoded.
    NonJson {
        /// Raw body text.
        raw: String,
    },

    /// The body is a single envelope and the key service timed out while
    /// fetching its key.
    KeyServiceTimeout {
        /// The envelope, unchanged.
        original: Value,
    },
}

/// Opens envelopes found in response bodies.
#[derive(Clone)]
pub struct ResponseDecryptor {
    keys: Arc<dyn KeyService>,
    nested_depth: usize,
    concurrency: usize,
}

impl ResponseDecryptor {
    /// Create a decryptor.
    ///
    /// `nested_depth` is the number of extra levels of object/array nesting
    /// searched for envelopes (0 = top level and top-level array elements
    /// only). `concurrency` caps simultaneous element decryptions; values
    /// below 1 are treated as 1.
    pub fn new(keys: Arc<dyn KeyService>, nested_depth: usize, concurrency: usize) -> Self {
        Self {
            keys,
            nested_depth,
            concurrency: concurrency.max(1),
        }
    }

    /// Parse `raw` as JSON and open every envelope within reach.
    ///
    /// Never fails. `marked_encrypted` reports whether the backend flagged the
    /// body as encrypted; it only affects how loudly fallbacks are logged.
    pub async fn decrypt_response(&self, raw: &[u8], marked_encrypted: bool) -> Decrypted {
        let value: Value = match serde_json::from_slice(raw) {
            Ok(v) => v,
            Err(_) => {
                return Decrypted::NonJson {
                    raw: String::from_utf8_lossy(raw).into_owned(),
                }
            }
        };

        match value {
            Value::Array(items) => {
                let items = self
                    .resolve_all(items, self.nested_depth, marked_encrypted)
                    .await;
                Decrypted::Json(Value::Array(items))
            }
            v if looks_like_envelope(&v) => match self.decrypt_one(&v).await {
                Ok(plain) => Decrypted::Json(plain),
                Err(EnvelopeError::KeyService(e)) if e.is_timeout() => {
                    Decrypted::KeyServiceTimeout { original: v }
                }
                Err(e) => {
                    log_fallback(&e, marked_encrypted);
                    Decrypted::Json(v)
                }
            },
            other => Decrypted::Json(self.resolve(other, self.nested_depth, marked_encrypted).await),
        }
    }

    /// Open a single envelope-shaped value.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::MalformedEnvelope`] if a field is not a string, not
    ///   valid base64, or has the wrong length, or if the plaintext is not
    ///   UTF-8 JSON. No key is fetched for undecodable fields.
    /// - [`EnvelopeError::KeyService`] if the key cannot be fetched.
    /// - [`EnvelopeError::AeadVerification`] if the tag does not verify.
    pub async fn decrypt_one(&self, value: &Value) -> Result<Value, EnvelopeError> {
        let envelope: Envelope = serde_json::from_value(value.clone())
            .map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))?;
        let sealed = unframe(&envelope)?;

        let key = self
            .keys
            .fetch_for_decryption(&envelope.key_id, &envelope.encrypted_key)
            .await?;

        let plaintext = cipher::decrypt(&sealed, key.as_bytes()).map_err(|e| match e {
            CipherError::AeadFailure => EnvelopeError::AeadVerification,
            other => EnvelopeError::MalformedEnvelope(other.to_string()),
        })?;
        drop(key);

        let plain = serde_json::from_slice(&plaintext)
            .map_err(|_| EnvelopeError::MalformedEnvelope("plaintext is not UTF-8 JSON".into()))?;
        debug!(key_id = %envelope.key_id, "envelope decrypted");
        Ok(plain)
    }

    /// Resolve `values` concurrently, preserving order.
    async fn resolve_all(&self, values: Vec<Value>, depth: usize, marked: bool) -> Vec<Value> {
        stream::iter(values.into_iter().map(|v| self.resolve(v, depth, marked)))
            .buffered(self.concurrency)
            .collect()
            .await
    }

    /// Open `value` if it is an envelope, otherwise descend up to `depth` levels.
    fn resolve(&self, value: Value, depth: usize, marked: bool) -> BoxFuture<'_, Value> {
        Box::pin(async move {
            if looks_like_envelope(&value) {
                return match self.decrypt_one(&value).await {
                    Ok(plain) => plain,
                    Err(e) => {
                        log_fallback(&e, marked);
                        value
                    }
                };
            }
            if depth == 0 {
                return value;
            }
            match value {
                Value::Array(items) => Value::Array(self.resolve_all(items, depth - 1, marked).await),
                Value::Object(map) => {
                    let (keys, values): (Vec<String>, Vec<Value>) = map.into_iter().unzip();
                    let values = self.resolve_all(values, depth - 1, marked).await;
                    Value::Object(keys.into_iter().zip(values).collect::<Map<_, _>>())
                }
                scalar => scalar,
            }
        })
    }
}

fn log_fallback(err: &EnvelopeError, marked_encrypted: bool) {
    if marked_encrypted {
        warn!(error = %err, "response marked encrypted but envelope could not be opened; passing through");
    } else {
        debug!(error = %err, "envelope-shaped value could not be opened; passing through");
    }
}
