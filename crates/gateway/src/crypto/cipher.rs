//! AES-256-GCM encryption with the authentication tag carried separately.
//!
//! Envelopes transport `ciphertext`, `iv`, and `tag` as three independent
//! fields, so this module uses the detached in-place AEAD API rather than the
//! combined `ciphertext || tag` output.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit, OsRng},
    Aes256Gcm, Nonce, Tag,
};
use thiserror::Error;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM nonce (12 bytes = 96 bits).
pub const IV_LEN: usize = 12;

/// Byte length of an AES-GCM authentication tag.
pub const TAG_LEN: usize = 16;

/// Output of one encryption, or the decoded input of one decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    /// Random nonce drawn for this encryption.
    pub iv: [u8; IV_LEN],
    /// Ciphertext, same length as the plaintext.
    pub ciphertext: Vec<u8>,
    /// Authentication tag.
    pub tag: [u8; TAG_LEN],
}

impl SealedPayload {
    /// Assemble a payload from decoded wire bytes, checking the fixed lengths.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidIvLength`] or [`CipherError::InvalidTagLength`]
    /// if either slice has the wrong size.
    pub fn from_parts(iv: &[u8], ciphertext: Vec<u8>, tag: &[u8]) -> Result<Self, CipherError> {
        let iv: [u8; IV_LEN] = iv
            .try_into()
            .map_err(|_| CipherError::InvalidIvLength(iv.len()))?;
        let tag: [u8; TAG_LEN] = tag
            .try_into()
            .map_err(|_| CipherError::InvalidTagLength(tag.len()))?;
        Ok(Self {
            iv,
            ciphertext,
            tag,
        })
    }
}

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The key is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid key length: expected {KEY_LEN} bytes")]
    InvalidKeyLength,

    /// The nonce is the wrong length.
    #[error("invalid iv length: expected {IV_LEN} bytes, got {0}")]
    InvalidIvLength(usize),

    /// The tag is the wrong length.
    #[error("invalid tag length: expected {TAG_LEN} bytes, got {0}")]
    InvalidTagLength(usize),

    /// Encryption failed, or decryption failed tag verification.
    #[error("aead operation failed")]
    AeadFailure,
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if `key` is not [`KEY_LEN`] bytes.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<SealedPayload, CipherError> {
    let cipher = build_cipher(key)?;

    use aes_gcm::aead::rand_core::RngCore;
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
        .map_err(|_| CipherError::AeadFailure)?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(SealedPayload {
        iv,
        ciphertext: buffer,
        tag: tag_bytes,
    })
}

/// Decrypt and authenticate a [`SealedPayload`].
///
/// Fails closed: no plaintext is returned unless the tag verifies.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if `key` is not [`KEY_LEN`] bytes.
/// Returns [`CipherError::AeadFailure`] on a wrong key or tampered data.
pub fn decrypt(sealed: &SealedPayload, key: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = build_cipher(key)?;
    let mut buffer = sealed.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&sealed.iv),
            b"",
            &mut buffer,
            Tag::from_slice(&sealed.tag),
        )
        .map_err(|_| CipherError::AeadFailure)?;
    Ok(buffer)
}

fn build_cipher(key: &[u8]) -> Result<Aes256Gcm, CipherError> {
    if key.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength);
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_key() -> Vec<u8> {
        use aes_gcm::aead::rand_core::RngCore;
        let mut key = vec![0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        key
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = random_key();
        let plaintext = br#"{"a":1,"b":[1,2,3]}"#;
        let sealed = encrypt(plaintext, &key).unwrap();
        assert_eq!(decrypt(&sealed, &key).unwrap(), plaintext);
    }

    #[test]
    fn ciphertext_length_matches_plaintext() {
        let key = random_key();
        let sealed = encrypt(b"hello", &key).unwrap();
        assert_eq!(sealed.ciphertext.len(), 5);
        assert_eq!(sealed.tag.len(), TAG_LEN);
    }

    #[test]
    fn fresh_iv_per_call() {
        let key = random_key();
        let a = encrypt(b"same", &key).unwrap();
        let b = encrypt(b"same", &key).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let sealed = encrypt(b"secret", &random_key()).unwrap();
        assert!(matches!(
            decrypt(&sealed, &random_key()),
            Err(CipherError::AeadFailure)
        ));
    }

    #[test]
    fn invalid_key_length_rejected() {
        assert!(matches!(
            encrypt(b"x", &[0u8; 16]),
            Err(CipherError::InvalidKeyLength)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let key = random_key();
        let mut sealed = encrypt(b"tamper me", &key).unwrap();
        sealed.ciphertext[0] ^= 0x01;
        assert!(decrypt(&sealed, &key).is_err());
    }

    #[test]
    fn tampered_tag_fails_auth() {
        let key = random_key();
        let mut sealed = encrypt(b"tamper me", &key).unwrap();
        sealed.tag[TAG_LEN - 1] ^= 0x80;
        assert!(decrypt(&sealed, &key).is_err());
    }

    #[test]
    fn from_parts_checks_lengths() {
        assert!(matches!(
            SealedPayload::from_parts(&[0u8; 8], vec![], &[0u8; TAG_LEN]),
            Err(CipherError::InvalidIvLength(8))
        ));
        assert!(matches!(
            SealedPayload::from_parts(&[0u8; IV_LEN], vec![], &[0u8; 4]),
            Err(CipherError::InvalidTagLength(4))
        ));
        assert!(SealedPayload::from_parts(&[0u8; IV_LEN], vec![1], &[0u8; TAG_LEN]).is_ok());
    }
}
