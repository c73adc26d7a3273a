//! Axum request handlers.
//!
//! [`forward`] and [`forward_nested`] are the proxy call sites: they envelope
//! the request body when the resource is flagged, call the backend, and run
//! every response body through the decryptor.

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::{
    ErrorResponse, HealthResponse, ENCRYPTED_MARKER_HEADER, ENCRYPTED_MARKER_VALUE,
};
use common::ServiceError;
use serde_json::Value;
use tracing::{info, warn};

use super::state::AppState;
use crate::backend::{BackendError, BackendRequest};
use crate::envelope::{Decrypted, EnvelopeError};

/// Caller headers copied onto the backend request.
const FORWARDED_HEADERS: [&str; 5] = [
    "authorization",
    "cookie",
    "accept",
    "x-request-id",
    "x-tenant-id",
];

/// `GET /health`: liveness check.
pub async fn health(State(state): State<AppState>) -> Response {
    let body = HealthResponse {
        status: "ok".into(),
        encrypt_all: state.flags.encrypts_all(),
        encrypted_resources: state.flags.len(),
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(err))
}

/// `ANY /{resource}`: proxy to the backend.
pub async fn forward(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Path(resource): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let call = Call {
        method,
        resource: &resource,
        path: uri.path(),
        query: query.as_deref(),
    };
    respond(proxy(&state, call, &headers, body).await)
}

/// `ANY /{resource}/{*rest}`: proxy to the backend.
pub async fn forward_nested(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Path((resource, _rest)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let call = Call {
        method,
        resource: &resource,
        path: uri.path(),
        query: query.as_deref(),
    };
    respond(proxy(&state, call, &headers, body).await)
}

struct Call<'a> {
    method: Method,
    /// Decoded first path segment, used for flag and deadline lookups.
    resource: &'a str,
    /// Raw request path, still percent-encoded.
    path: &'a str,
    query: Option<&'a str>,
}

/// Returns `true` if any raw segment of `path` is `.` or `..`, encoded or not.
fn has_dot_segment(path: &str) -> bool {
    path.split('/').any(|seg| {
        let seg = seg.to_ascii_lowercase().replace("%2e", ".");
        seg == "." || seg == ".."
    })
}

fn respond(result: Result<Response, ServiceError>) -> Response {
    match result {
        Ok(resp) => resp,
        Err(e) => {
            let status =
                StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(e.to_response())).into_response()
        }
    }
}

async fn proxy(
    state: &AppState,
    call: Call<'_>,
    inbound: &HeaderMap,
    body: Bytes,
) -> Result<Response, ServiceError> {
    if has_dot_segment(call.path) {
        return Err(ServiceError::BadRequest(
            "path must not contain dot segments".into(),
        ));
    }

    let mut headers = HeaderMap::new();
    for name in FORWARDED_HEADERS {
        for value in inbound.get_all(name) {
            headers.append(name, value.clone());
        }
    }

    let encrypt = state.flags.should_encrypt(call.resource) && !body.is_empty();
    let body = if encrypt {
        let plaintext: Value = serde_json::from_slice(&body)
            .map_err(|_| ServiceError::BadRequest("request body is not valid JSON".into()))?;
        let envelope = state
            .encryptor
            .encrypt(&plaintext)
            .await
            .map_err(encryption_error)?;
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            HeaderName::from_static(ENCRYPTED_MARKER_HEADER),
            HeaderValue::from_static(ENCRYPTED_MARKER_VALUE),
        );
        Bytes::from(
            serde_json::to_vec(&envelope).map_err(|e| ServiceError::Internal(e.to_string()))?,
        )
    } else {
        if let Some(ct) = inbound.get(header::CONTENT_TYPE) {
            headers.insert(header::CONTENT_TYPE, ct.clone());
        }
        body
    };

    let deadline = state.deadlines.deadline_for(call.resource);
    let resp = state
        .backend
        .send(BackendRequest {
            method: call.method.clone(),
            path: call.path,
            query: call.query,
            headers,
            body,
            deadline,
        })
        .await
        .map_err(|e| match e {
            BackendError::Timeout(_) => {
                warn!(resource = %call.resource, error = %e, "backend deadline exceeded");
                ServiceError::UpstreamTimeout {
                    message: e.to_string(),
                    upstream_status: None,
                }
            }
            BackendError::Unavailable(_) => {
                warn!(resource = %call.resource, error = %e, "backend unavailable");
                ServiceError::UpstreamUnavailable(e.to_string())
            }
        })?;

    info!(
        method = %call.method,
        resource = %call.resource,
        status = resp.status,
        encrypted = encrypt,
        "proxied request"
    );

    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::BAD_GATEWAY);
    if resp.body.is_empty() {
        return Ok(status.into_response());
    }

    match state
        .decryptor
        .decrypt_response(&resp.body, resp.marked_encrypted)
        .await
    {
        Decrypted::Json(value) => Ok((status, Json(value)).into_response()),
        Decrypted::NonJson { raw } => {
            warn!(resource = %call.resource, status = resp.status, "backend returned non-JSON body");
            Err(ServiceError::NonJsonResponse {
                status: resp.status,
                raw,
            })
        }
        Decrypted::KeyServiceTimeout { original } => {
            let key_id = original
                .get("key_id")
                .and_then(Value::as_str)
                .unwrap_or_default();
            warn!(resource = %call.resource, key_id = %key_id, "key service timed out while decrypting response");
            Err(ServiceError::UpstreamTimeout {
                message: "key service timed out while decrypting response".into(),
                upstream_status: Some(resp.status),
            })
        }
    }
}

fn encryption_error(e: EnvelopeError) -> ServiceError {
    warn!(error = %e, "request body encryption failed; backend not called");
    match e {
        EnvelopeError::KeyService(k) if k.is_timeout() => ServiceError::UpstreamTimeout {
            message: "key service timed out while encrypting request".into(),
            upstream_status: None,
        },
        EnvelopeError::KeyService(k) => ServiceError::KeyService(k.to_string()),
        other => ServiceError::Internal(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum_test::TestServer;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde_json::json;
    use wiremock::matchers::{header as header_is, method as method_is, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::Config;
    use crate::envelope::PayloadEncryptor;
    use crate::keys::HttpKeyClient;
    use crate::server::router;

    const KEY: [u8; 32] = [0x11u8; 32];

    async fn key_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method_is("GET"))
            .and(path_regex(r"^/get-key/.+$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "encrypted_key": "wrapped",
                "aes_key_b64": STANDARD.encode(KEY),
            })))
            .mount(&server)
            .await;
        server
    }

    fn gateway(cfg: &Config) -> TestServer {
        let state = AppState::from_config(cfg).unwrap();
        TestServer::new(router::build(state, cfg.max_body_bytes, Duration::from_secs(30))).unwrap()
    }

    async fn envelope_for(keys: &MockServer, v: Value) -> Value {
        let client = HttpKeyClient::new(&keys.uri(), Duration::from_secs(5)).unwrap();
        let enc = PayloadEncryptor::new(std::sync::Arc::new(client));
        serde_json::to_value(enc.encrypt(&v).await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let cfg = Config::for_tests("http://127.0.0.1:1", "http://127.0.0.1:1", "tickets");
        let resp = gateway(&cfg).get("/health").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["encrypt_all"], false);
        assert_eq!(body["encrypted_resources"], 1);
    }

    #[tokio::test]
    async fn health_reports_wildcard_separately() {
        let cfg = Config::for_tests("http://127.0.0.1:1", "http://127.0.0.1:1", "*");
        let body: Value = gateway(&cfg).get("/health").await.json();
        assert_eq!(body["encrypt_all"], true);
        assert_eq!(body["encrypted_resources"], 0);
    }

    #[tokio::test]
    async fn backend_redirect_status_is_passed_through() {
        let backend = MockServer::start().await;
        Mock::given(method_is("POST"))
            .and(path("/tickets"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/elsewhere"))
            .expect(1)
            .mount(&backend)
            .await;
        Mock::given(method_is("GET"))
            .and(path("/elsewhere"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"moved": true})))
            .expect(0)
            .mount(&backend)
            .await;

        let cfg = Config::for_tests("http://127.0.0.1:1", &backend.uri(), "");
        let resp = gateway(&cfg)
            .post("/tickets")
            .json(&json!({"subject": "help"}))
            .await;
        resp.assert_status(StatusCode::FOUND);
    }

    #[tokio::test]
    async fn encoded_slash_reaches_backend_unchanged() {
        let backend = MockServer::start().await;
        Mock::given(method_is("GET"))
            .and(path("/files/report%2F2024.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "report"})))
            .expect(1)
            .mount(&backend)
            .await;

        let cfg = Config::for_tests("http://127.0.0.1:1", &backend.uri(), "");
        let resp = gateway(&cfg).get("/files/report%2F2024.pdf").await;
        resp.assert_status_ok();
        assert_eq!(resp.json::<Value>(), json!({"name": "report"}));
    }

    #[test]
    fn dot_segments_are_detected() {
        assert!(has_dot_segment("/tickets/../admin"));
        assert!(has_dot_segment("/tickets/%2E%2e/admin"));
        assert!(has_dot_segment("/tickets/./1"));
        assert!(!has_dot_segment("/tickets/1..2"));
        assert!(!has_dot_segment("/files/report%2F2024.pdf"));
    }

    #[tokio::test]
    async fn flagged_resource_sends_envelope() {
        let keys = key_server().await;
        let backend = MockServer::start().await;
        Mock::given(method_is("POST"))
            .and(path("/tickets"))
            .and(header_is("x-encrypted", "1"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
            .expect(1)
            .mount(&backend)
            .await;

        let cfg = Config::for_tests(&keys.uri(), &backend.uri(), "tickets");
        let resp = gateway(&cfg)
            .post("/tickets")
            .json(&json!({"subject": "help"}))
            .await;
        resp.assert_status(StatusCode::CREATED);
        assert_eq!(resp.json::<Value>(), json!({"id": 1}));

        let received = backend.received_requests().await.unwrap();
        let sent: Value = serde_json::from_slice(&received[0].body).unwrap();
        assert!(common::looks_like_envelope(&sent));
        assert!(sent.get("subject").is_none());
        assert_eq!(sent["encrypted_key"], "wrapped");
    }

    #[tokio::test]
    async fn unflagged_resource_sends_plaintext() {
        let backend = MockServer::start().await;
        Mock::given(method_is("POST"))
            .and(path("/surveys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&backend)
            .await;

        let cfg = Config::for_tests("http://127.0.0.1:1", &backend.uri(), "tickets");
        let resp = gateway(&cfg)
            .post("/surveys")
            .json(&json!({"q": 1}))
            .await;
        resp.assert_status_ok();

        let received = backend.received_requests().await.unwrap();
        assert!(received[0].headers.get("x-encrypted").is_none());
        let sent: Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(sent, json!({"q": 1}));
    }

    #[tokio::test]
    async fn key_service_outage_blocks_encrypted_request() {
        let backend = MockServer::start().await;
        Mock::given(method_is("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&backend)
            .await;

        let cfg = Config::for_tests("http://127.0.0.1:1", &backend.uri(), "tickets");
        let resp = gateway(&cfg)
            .post("/tickets")
            .json(&json!({"subject": "help"}))
            .await;
        resp.assert_status(StatusCode::BAD_GATEWAY);
        assert_eq!(resp.json::<Value>()["code"], "key_service_error");
    }

    #[tokio::test]
    async fn key_timeout_while_encrypting_is_upstream_timeout() {
        let slow_keys = MockServer::start().await;
        Mock::given(method_is("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(1500)))
            .mount(&slow_keys)
            .await;
        let backend = MockServer::start().await;
        Mock::given(method_is("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&backend)
            .await;

        let mut cfg = Config::for_tests(&slow_keys.uri(), &backend.uri(), "*");
        cfg.key_service_timeout_secs = 1;
        let resp = gateway(&cfg)
            .post("/contacts")
            .json(&json!({"email": "a@example.com"}))
            .await;
        resp.assert_status(StatusCode::GATEWAY_TIMEOUT);
        let body: Value = resp.json();
        assert_eq!(body["code"], "upstream_timeout");
        assert!(body.get("upstream_status").is_none());
    }

    #[tokio::test]
    async fn invalid_json_on_flagged_resource_is_rejected() {
        let backend = MockServer::start().await;
        let cfg = Config::for_tests("http://127.0.0.1:1", &backend.uri(), "tickets");
        let resp = gateway(&cfg).post("/tickets").text("not json").await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(resp.json::<Value>()["code"], "bad_request");
    }

    #[tokio::test]
    async fn list_response_is_decrypted_in_place() {
        let keys = key_server().await;
        let record = json!({"id": 9, "email": "a@example.com"});
        let body = json!([{"x": 1}, envelope_for(&keys, record.clone()).await]);

        let backend = MockServer::start().await;
        Mock::given(method_is("GET"))
            .and(path("/contacts/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&backend)
            .await;

        let cfg = Config::for_tests(&keys.uri(), &backend.uri(), "");
        let resp = gateway(&cfg).get("/contacts/list").await;
        resp.assert_status_ok();
        assert_eq!(resp.json::<Value>(), json!([{"x": 1}, record]));
    }

    #[tokio::test]
    async fn plain_response_and_status_pass_through() {
        let backend = MockServer::start().await;
        Mock::given(method_is("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"status": "missing"})))
            .mount(&backend)
            .await;

        let cfg = Config::for_tests("http://127.0.0.1:1", &backend.uri(), "");
        let resp = gateway(&cfg).get("/billing/7").await;
        resp.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(resp.json::<Value>(), json!({"status": "missing"}));
    }

    #[tokio::test]
    async fn non_json_response_is_structured_error() {
        let backend = MockServer::start().await;
        Mock::given(method_is("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("not json"))
            .mount(&backend)
            .await;

        let cfg = Config::for_tests("http://127.0.0.1:1", &backend.uri(), "");
        let resp = gateway(&cfg).get("/tickets").await;
        resp.assert_status(StatusCode::BAD_GATEWAY);
        let body: Value = resp.json();
        assert_eq!(body["code"], "non_json_response");
        assert_eq!(body["raw"], "not json");
        assert_eq!(body["upstream_status"], 502);
    }

    #[tokio::test]
    async fn empty_response_keeps_status() {
        let backend = MockServer::start().await;
        Mock::given(method_is("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&backend)
            .await;

        let cfg = Config::for_tests("http://127.0.0.1:1", &backend.uri(), "");
        let resp = gateway(&cfg).delete("/tickets/3").await;
        resp.assert_status(StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn slow_backend_is_upstream_timeout() {
        let backend = MockServer::start().await;
        Mock::given(method_is("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(1500)))
            .mount(&backend)
            .await;

        let mut cfg = Config::for_tests("http://127.0.0.1:1", &backend.uri(), "");
        cfg.backend_timeout_secs = 1;
        let resp = gateway(&cfg).get("/tickets").await;
        resp.assert_status(StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(resp.json::<Value>()["code"], "upstream_timeout");
    }

    #[tokio::test]
    async fn key_timeout_on_single_envelope_is_upstream_timeout() {
        let keys = key_server().await;
        let env = envelope_for(&keys, json!({"a": 1})).await;

        let slow_keys = MockServer::start().await;
        Mock::given(method_is("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(1500)))
            .mount(&slow_keys)
            .await;
        let backend = MockServer::start().await;
        Mock::given(method_is("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(env))
            .mount(&backend)
            .await;

        let mut cfg = Config::for_tests(&slow_keys.uri(), &backend.uri(), "");
        cfg.key_service_timeout_secs = 1;
        let resp = gateway(&cfg).get("/tickets/1").await;
        resp.assert_status(StatusCode::GATEWAY_TIMEOUT);
        let body: Value = resp.json();
        assert_eq!(body["code"], "upstream_timeout");
        assert_eq!(body["upstream_status"], 200);
    }
}
