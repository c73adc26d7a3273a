//! [`PayloadEncryptor`]: turns a plaintext JSON value into an [`Envelope`].

use std::sync::Arc;

use common::Envelope;
use serde_json::Value;
use tracing::debug;

use super::{frame, EnvelopeError};
use crate::crypto::cipher;
use crate::keys::KeyService;

/// Seals outbound JSON bodies under a freshly issued key.
#[derive(Clone)]
pub struct PayloadEncryptor {
    keys: Arc<dyn KeyService>,
}

impl PayloadEncryptor {
    /// Create an encryptor that obtains keys from `keys`.
    pub fn new(keys: Arc<dyn KeyService>) -> Self {
        Self { keys }
    }

    /// Serialise `plaintext` and seal it under a new key.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Serialization`] if `plaintext` cannot be
    /// serialised and [`EnvelopeError::KeyService`] if no key could be
    /// obtained. Either way nothing is produced that could be sent unencrypted.
    pub async fn encrypt(&self, plaintext: &Value) -> Result<Envelope, EnvelopeError> {
        let bytes = serde_json::to_vec(plaintext).map_err(EnvelopeError::Serialization)?;
        let issued = self.keys.issue_for_encryption().await?;
        let sealed = cipher::encrypt(&bytes, issued.key.as_bytes()).map_err(EnvelopeError::Cipher)?;
        debug!(key_id = %issued.key_id, len = bytes.len(), "payload enveloped");
        Ok(frame(issued, &sealed))
    }
}
