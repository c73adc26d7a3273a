//! `gateway`: envelope-encryption gateway entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline.
//! 3. Build the key-service and backend clients and resolve per-resource flags.
//! 4. Build the Axum router and start the HTTP server.

mod backend;
mod config;
mod crypto;
mod envelope;
mod flags;
mod keys;
mod server;
mod telemetry;

use anyhow::Result;
use tracing::{info, warn};

use config::Config;
use server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otel_exporter_otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = cfg.listen_port,
        "envelope gateway starting"
    );

    // -----------------------------------------------------------------------
    // 3. Clients and flags
    // -----------------------------------------------------------------------
    let state = AppState::from_config(&cfg)?;
    if state.flags.is_empty() {
        warn!("ENCRYPT_RESOURCES is empty; request bodies are forwarded unencrypted");
    }
    info!(
        encrypt_all = state.flags.encrypts_all(),
        encrypted_resources = state.flags.len(),
        nested_decrypt_depth = cfg.nested_decrypt_depth,
        "gateway state ready"
    );

    // -----------------------------------------------------------------------
    // 4. HTTP server
    // -----------------------------------------------------------------------
    let request_timeout =
        server::middleware::request_timeout(&state.deadlines, cfg.key_service_timeout());
    let router = server::router::build(state, cfg.max_body_bytes, request_timeout);

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], cfg.listen_port).into();
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
