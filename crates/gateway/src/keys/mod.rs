//! Per-operation key retrieval from the external key-issuance service.
//!
//! # Lifecycle
//!
//! 1. Encryption: [`mint_key_id`] produces a fresh identifier, and
//!    [`KeyService::issue_for_encryption`] obtains a new AES-256 key plus its
//!    wrapped form for that identifier.
//! 2. Decryption: [`KeyService::fetch_for_decryption`] sends an inbound
//!    envelope's `key_id` and wrapped key and receives the same raw key back.
//! 3. The raw key lives in a [`KeyBytes`] that is dropped (and zeroed) as soon
//!    as the single cipher operation completes.
//!
//! # Invariants
//!
//! - Keys are never cached, persisted, or reused across operations. Every
//!   encrypt and every decrypt performs its own fetch.
//! - A key-service failure is always an error. No caller may substitute a
//!   default key or skip encryption.

pub mod http;
pub mod material;

pub use http::HttpKeyClient;
pub use material::{IssuedKey, KeyBytes};

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Prefix of every locally minted `key_id`.
pub const KEY_ID_PREFIX: &str = "req_";

/// Errors produced while talking to the key-issuance service.
#[derive(Debug, Error)]
pub enum KeyServiceError {
    /// The service did not answer within the configured deadline.
    #[error("key service timed out")]
    Timeout,

    /// The service could not be reached.
    #[error("key service unreachable: {0}")]
    Unreachable(String),

    /// The service answered with a non-2xx status.
    #[error("key service returned status {0}")]
    Status(u16),

    /// The service answered 2xx but the body or the key in it is unusable.
    #[error("key service returned a malformed response: {0}")]
    Malformed(String),
}

impl KeyServiceError {
    /// Returns `true` for deadline overruns.
    pub fn is_timeout(&self) -> bool {
        matches!(self, KeyServiceError::Timeout)
    }
}

/// The key-issuance contract used by the envelope layer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyService: Send + Sync {
    /// Mint a `key_id` and obtain a fresh key plus its wrapped form.
    async fn issue_for_encryption(&self) -> Result<IssuedKey, KeyServiceError>;

    /// Recover the raw key an inbound envelope was encrypted under.
    async fn fetch_for_decryption(
        &self,
        key_id: &str,
        wrapped_key: &str,
    ) -> Result<KeyBytes, KeyServiceError>;
}

/// Mint a process-unique key identifier: prefix, wall-clock nanoseconds, and a
/// random v4 UUID.
pub fn mint_key_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{KEY_ID_PREFIX}{nanos}_{}", Uuid::new_v4().simple())
}
