//! Calls to the backend-of-record.
//!
//! Every call carries its own deadline. A deadline overrun is reported as
//! [`BackendError::Timeout`] and never folded into [`BackendError::Unavailable`].

use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use common::protocol::{ENCRYPTED_MARKER_HEADER, ENCRYPTED_MARKER_VALUE};
use reqwest::header::HeaderMap;
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Url};
use thiserror::Error;
use tracing::debug;

/// Errors produced by a backend call.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No complete response within the deadline.
    #[error("backend did not respond within {}s", .0.as_secs())]
    Timeout(Duration),

    /// The backend could not be reached or the connection broke.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// One outbound call.
#[derive(Debug)]
pub struct BackendRequest<'a> {
    /// HTTP method, passed through from the caller.
    pub method: Method,
    /// Request path relative to the backend base URL, still percent-encoded.
    pub path: &'a str,
    /// Raw query string, without the leading `?`.
    pub query: Option<&'a str>,
    /// Headers to send.
    pub headers: HeaderMap,
    /// Body to send, plaintext or an encoded envelope.
    pub body: Bytes,
    /// Deadline for the whole exchange, body included.
    pub deadline: Duration,
}

/// The backend's answer, body fully read.
#[derive(Debug)]
pub struct BackendResponse {
    /// HTTP status code.
    pub status: u16,
    /// Whether the backend sent `x-encrypted: 1`.
    pub marked_encrypted: bool,
    /// Raw body bytes.
    pub body: Bytes,
}

/// HTTP client for the backend-of-record.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base_url: Url,
}

impl BackendClient {
    /// Build a client for the backend rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not an absolute hierarchical URL or
    /// if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("invalid backend URL: {base_url}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("backend URL must be hierarchical: {base_url}");
        }
        let client = Client::builder()
            .redirect(Policy::none())
            .build()
            .context("failed to build backend HTTP client")?;
        Ok(Self { client, base_url })
    }

    /// Join the encoded request path and query onto the base URL.
    ///
    /// The path is appended as-is so that encoded separators such as `%2F`
    /// reach the backend unchanged.
    fn url_for(&self, req: &BackendRequest<'_>) -> Url {
        let mut url = self.base_url.clone();
        let path = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            req.path.trim_start_matches('/')
        );
        url.set_path(&path);
        url.set_query(req.query.filter(|q| !q.is_empty()));
        url
    }

    /// Send `req` and read the whole response.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Timeout`] when the deadline passes before the
    /// body is fully read, and [`BackendError::Unavailable`] on any other
    /// transport failure. Non-2xx statuses, redirects included, are not
    /// errors and are never followed.
    pub async fn send(&self, req: BackendRequest<'_>) -> Result<BackendResponse, BackendError> {
        let url = self.url_for(&req);
        let deadline = req.deadline;
        debug!(method = %req.method, url = %url, "calling backend");

        let resp = self
            .client
            .request(req.method, url)
            .headers(req.headers)
            .body(req.body)
            .timeout(deadline)
            .send()
            .await
            .map_err(|e| classify(e, deadline))?;

        let status = resp.status().as_u16();
        let marked_encrypted = resp
            .headers()
            .get(ENCRYPTED_MARKER_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim() == ENCRYPTED_MARKER_VALUE);
        let body = resp.bytes().await.map_err(|e| classify(e, deadline))?;

        Ok(BackendResponse {
            status,
            marked_encrypted,
            body,
        })
    }
}

fn classify(e: reqwest::Error, deadline: Duration) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout(deadline)
    } else {
        BackendError::Unavailable(e.to_string())
    }
}
