//! [`KeyBytes`]: the raw AES key for exactly one encrypt or decrypt call.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::KeyServiceError;
use crate::crypto::KEY_LEN;

/// Fixed-size key buffer that holds exactly [`KEY_LEN`] bytes.
///
/// Lives only on the stack of the operation it was fetched for. When dropped,
/// the memory is overwritten with zeroes.
#[derive(Clone)]
pub struct KeyBytes(Box<[u8; KEY_LEN]>);

impl KeyBytes {
    /// Copy `bytes` into a new key buffer.
    ///
    /// # Errors
    ///
    /// Returns [`KeyServiceError::Malformed`] if `bytes` is not [`KEY_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyServiceError> {
        if bytes.len() != KEY_LEN {
            return Err(KeyServiceError::Malformed(format!(
                "key has invalid length: expected {KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Decode a standard-base64 key as returned by the key-issuance service.
    ///
    /// # Errors
    ///
    /// Returns [`KeyServiceError::Malformed`] on invalid base64 or wrong length.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyServiceError> {
        let mut raw = STANDARD
            .decode(encoded.trim())
            .map_err(|_| KeyServiceError::Malformed("key is not valid base64".into()))?;
        let key = Self::from_slice(&raw);
        raw.iter_mut().for_each(|b| *b = 0);
        key
    }

    /// Borrow the key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl Drop for KeyBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for KeyBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material, not even in debug builds.
        f.write_str("KeyBytes([REDACTED])")
    }
}

/// A freshly issued key for the encryption path.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    /// Identifier minted for this encryption.
    pub key_id: String,
    /// Raw AES-256 key.
    pub key: KeyBytes,
    /// Wrapped key to embed verbatim as the envelope's `encrypted_key`.
    pub wrapped_key: String,
}
