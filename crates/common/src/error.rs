//! Client-visible error taxonomy shared across crates.

use thiserror::Error;

use crate::protocol::ErrorResponse;

/// Errors surfaced to gateway callers.
///
/// Variants map to HTTP status codes:
/// - [`ServiceError::BadRequest`] → 400
/// - [`ServiceError::KeyService`] → 502
/// - [`ServiceError::UpstreamUnavailable`] → 502
/// - [`ServiceError::UpstreamTimeout`] → 504
/// - [`ServiceError::NonJsonResponse`] → the backend's own status
/// - [`ServiceError::Internal`] → 500
///
/// Decryption failures never appear here: they are recovered by passing the
/// original value through.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request was malformed, e.g. a non-JSON body on an encrypted resource.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The key-issuance service failed while encrypting a request body.
    #[error("key service error: {0}")]
    KeyService(String),

    /// The backend or key service did not answer within its deadline.
    #[error("upstream timeout: {message}")]
    UpstreamTimeout {
        /// Which dependency timed out.
        message: String,
        /// Backend status, if the backend had already answered.
        upstream_status: Option<u16>,
    },

    /// The backend could not be reached.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The backend answered with a body that is not JSON.
    #[error("upstream returned non-JSON body (status {status})")]
    NonJsonResponse {
        /// Backend status code, passed through to the caller.
        status: u16,
        /// Raw backend body.
        raw: String,
    },

    /// An unexpected internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Returns the HTTP status code that should be sent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::BadRequest(_) => 400,
            ServiceError::KeyService(_) => 502,
            ServiceError::UpstreamTimeout { .. } => 504,
            ServiceError::UpstreamUnavailable(_) => 502,
            ServiceError::NonJsonResponse { status, .. } => *status,
            ServiceError::Internal(_) => 500,
        }
    }

    /// Returns the machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::BadRequest(_) => "bad_request",
            ServiceError::KeyService(_) => "key_service_error",
            ServiceError::UpstreamTimeout { .. } => "upstream_timeout",
            ServiceError::UpstreamUnavailable(_) => "upstream_unavailable",
            ServiceError::NonJsonResponse { .. } => "non_json_response",
            ServiceError::Internal(_) => "internal_error",
        }
    }

    /// Build the structured body sent to the caller.
    pub fn to_response(&self) -> ErrorResponse {
        let base = ErrorResponse::new(self.code(), self.to_string());
        match self {
            ServiceError::UpstreamTimeout {
                upstream_status: Some(status),
                ..
            } => base.with_upstream_status(*status),
            ServiceError::NonJsonResponse { status, raw } => {
                base.with_upstream_status(*status).with_raw(raw.clone())
            }
            _ => base,
        }
    }
}
