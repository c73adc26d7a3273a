//! [`HttpKeyClient`]: the [`KeyService`] implementation backed by the
//! key-issuance service's `GET /get-key/{key_id}` endpoint.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use common::protocol::KeyResponse;
use reqwest::{Client, Url};
use tracing::debug;

use super::{mint_key_id, IssuedKey, KeyBytes, KeyService, KeyServiceError};

/// Query parameter carrying the wrapped key on the decryption path.
const WRAPPED_KEY_PARAM: &str = "encrypted_key";

/// HTTP client for the key-issuance service.
///
/// Every call is bounded by the deadline given to [`HttpKeyClient::new`].
#[derive(Debug, Clone)]
pub struct HttpKeyClient {
    client: Client,
    base_url: Url,
}

impl HttpKeyClient {
    /// Build a client for the service rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not an absolute hierarchical URL or
    /// if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("invalid key service URL: {base_url}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("key service URL must be hierarchical: {base_url}");
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build key service HTTP client")?;
        Ok(Self { client, base_url })
    }

    fn key_url(&self, key_id: &str) -> Result<Url, KeyServiceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| KeyServiceError::Unreachable("key service URL cannot be a base".into()))?
            .pop_if_empty()
            .push("get-key")
            .push(key_id);
        Ok(url)
    }

    async fn get_key(
        &self,
        key_id: &str,
        wrapped_key: Option<&str>,
    ) -> Result<KeyResponse, KeyServiceError> {
        let mut req = self.client.get(self.key_url(key_id)?);
        if let Some(wrapped) = wrapped_key {
            req = req.query(&[(WRAPPED_KEY_PARAM, wrapped)]);
        }

        let resp = req.send().await.map_err(classify_transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(KeyServiceError::Status(status.as_u16()));
        }

        resp.json::<KeyResponse>().await.map_err(|e| {
            if e.is_timeout() {
                KeyServiceError::Timeout
            } else {
                KeyServiceError::Malformed(e.to_string())
            }
        })
    }
}

#[async_trait]
impl KeyService for HttpKeyClient {
    async fn issue_for_encryption(&self) -> Result<IssuedKey, KeyServiceError> {
        let key_id = mint_key_id();
        let body = self.get_key(&key_id, None).await?;
        let key = KeyBytes::from_base64(&body.aes_key_b64)?;
        debug!(key_id = %key_id, "issued encryption key");
        Ok(IssuedKey {
            key_id,
            key,
            wrapped_key: body.encrypted_key,
        })
    }

    async fn fetch_for_decryption(
        &self,
        key_id: &str,
        wrapped_key: &str,
    ) -> Result<KeyBytes, KeyServiceError> {
        let body = self.get_key(key_id, Some(wrapped_key)).await?;
        let key = KeyBytes::from_base64(&body.aes_key_b64)?;
        debug!(key_id = %key_id, "fetched decryption key");
        Ok(key)
    }
}

fn classify_transport(e: reqwest::Error) -> KeyServiceError {
    if e.is_timeout() {
        KeyServiceError::Timeout
    } else {
        KeyServiceError::Unreachable(e.to_string())
    }
}
