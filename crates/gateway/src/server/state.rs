//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use anyhow::Result;

use crate::backend::BackendClient;
use crate::config::Config;
use crate::envelope::{PayloadEncryptor, ResponseDecryptor};
use crate::flags::{DeadlinePolicy, EncryptionFlags};
use crate::keys::{HttpKeyClient, KeyService};

/// Application state shared across all request handlers.
///
/// All fields are cheaply cloneable (`Arc`-wrapped or already `Arc`-backed) so
/// that Axum can clone the state for each request without copying expensive
/// data. Nothing in here is mutated after startup.
#[derive(Clone)]
pub struct AppState {
    /// Client for the backend-of-record.
    pub backend: BackendClient,
    /// Seals request bodies for encrypted resources.
    pub encryptor: PayloadEncryptor,
    /// Opens envelopes in backend responses.
    pub decryptor: ResponseDecryptor,
    /// Per-resource encryption switches.
    pub flags: Arc<EncryptionFlags>,
    /// Per-resource backend deadlines.
    pub deadlines: Arc<DeadlinePolicy>,
}

impl AppState {
    /// Create a new [`AppState`] around an existing key service.
    pub fn new(
        keys: Arc<dyn KeyService>,
        backend: BackendClient,
        flags: EncryptionFlags,
        deadlines: DeadlinePolicy,
        nested_decrypt_depth: usize,
        decrypt_concurrency: usize,
    ) -> Self {
        Self {
            backend,
            encryptor: PayloadEncryptor::new(keys.clone()),
            decryptor: ResponseDecryptor::new(keys, nested_decrypt_depth, decrypt_concurrency),
            flags: Arc::new(flags),
            deadlines: Arc::new(deadlines),
        }
    }

    /// Wire up the HTTP key client and backend client described by `cfg`.
    ///
    /// # Errors
    ///
    /// Returns an error if either client cannot be built.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let keys = HttpKeyClient::new(&cfg.key_service_url, cfg.key_service_timeout())?;
        let backend = BackendClient::new(&cfg.backend_url)?;
        Ok(Self::new(
            Arc::new(keys),
            backend,
            cfg.encryption_flags(),
            cfg.deadline_policy(),
            cfg.nested_decrypt_depth,
            cfg.decrypt_concurrency,
        ))
    }
}
