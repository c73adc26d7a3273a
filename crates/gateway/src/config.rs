//! Configuration loading and validation for the gateway.
//!
//! All values are read from environment variables once at startup. The process
//! exits with a clear error message if any required variable is missing or
//! invalid. Nothing reads the environment after this point.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::flags::{DeadlinePolicy, EncryptionFlags};

/// Upper bound on `NESTED_DECRYPT_DEPTH`.
pub const MAX_NESTED_DECRYPT_DEPTH: usize = 8;

/// Validated gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the key-issuance service. **Required.**
    pub key_service_url: String,

    /// Base URL of the backend-of-record. **Required.**
    pub backend_url: String,

    /// Port the gateway HTTP server listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Deadline (seconds) for each key-issuance call.
    #[serde(default = "default_key_service_timeout")]
    pub key_service_timeout_secs: u64,

    /// Deadline (seconds) for ordinary backend reads and writes.
    #[serde(default = "default_backend_timeout")]
    pub backend_timeout_secs: u64,

    /// Deadline (seconds) for bulk/file backend operations.
    #[serde(default = "default_bulk_timeout")]
    pub bulk_timeout_secs: u64,

    /// Comma-separated resources that use [`Config::bulk_timeout_secs`].
    #[serde(default)]
    pub bulk_resources: String,

    /// Comma-separated resources whose request bodies are enveloped. `*`
    /// enables every resource.
    #[serde(default)]
    pub encrypt_resources: String,

    /// Extra levels of object/array nesting searched for envelopes in
    /// responses.
    #[serde(default)]
    pub nested_decrypt_depth: usize,

    /// Maximum concurrent element decryptions per response array.
    #[serde(default = "default_decrypt_concurrency")]
    pub decrypt_concurrency: usize,

    /// Maximum accepted inbound request body, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Optional OTLP/gRPC endpoint for span export.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_listen_port() -> u16 {
    8080
}
fn default_key_service_timeout() -> u64 {
    10
}
fn default_backend_timeout() -> u64 {
    30
}
fn default_bulk_timeout() -> u64 {
    120
}
fn default_decrypt_concurrency() -> usize {
    16
}
fn default_max_body_bytes() -> usize {
    25 * 1024 * 1024
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Deadline for each key-issuance call.
    pub fn key_service_timeout(&self) -> Duration {
        Duration::from_secs(self.key_service_timeout_secs)
    }

    /// Resolve the encryption feature flags.
    pub fn encryption_flags(&self) -> EncryptionFlags {
        EncryptionFlags::from_csv(&self.encrypt_resources)
    }

    /// Resolve the per-resource backend deadlines.
    pub fn deadline_policy(&self) -> DeadlinePolicy {
        DeadlinePolicy::new(
            Duration::from_secs(self.backend_timeout_secs),
            Duration::from_secs(self.bulk_timeout_secs),
            &self.bulk_resources,
        )
    }

    /// Defaults plus the two service URLs and an encryption list.
    #[cfg(test)]
    pub fn for_tests(key_service_url: &str, backend_url: &str, encrypt_resources: &str) -> Self {
        Self {
            key_service_url: key_service_url.into(),
            backend_url: backend_url.into(),
            listen_port: default_listen_port(),
            key_service_timeout_secs: default_key_service_timeout(),
            backend_timeout_secs: default_backend_timeout(),
            bulk_timeout_secs: default_bulk_timeout(),
            bulk_resources: String::new(),
            encrypt_resources: encrypt_resources.into(),
            nested_decrypt_depth: 0,
            decrypt_concurrency: default_decrypt_concurrency(),
            max_body_bytes: default_max_body_bytes(),
            otel_exporter_otlp_endpoint: None,
            log_level: default_log_level(),
        }
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_url(&self.key_service_url, "KEY_SERVICE_URL")?;
        ensure_url(&self.backend_url, "BACKEND_URL")?;

        if self.key_service_timeout_secs == 0 {
            anyhow::bail!("KEY_SERVICE_TIMEOUT_SECS must be > 0");
        }
        if self.backend_timeout_secs == 0 {
            anyhow::bail!("BACKEND_TIMEOUT_SECS must be > 0");
        }
        if self.bulk_timeout_secs == 0 {
            anyhow::bail!("BULK_TIMEOUT_SECS must be > 0");
        }
        if self.decrypt_concurrency == 0 {
            anyhow::bail!("DECRYPT_CONCURRENCY must be > 0");
        }
        if self.nested_decrypt_depth > MAX_NESTED_DECRYPT_DEPTH {
            anyhow::bail!("NESTED_DECRYPT_DEPTH must be <= {MAX_NESTED_DECRYPT_DEPTH}");
        }
        Ok(())
    }
}

fn ensure_url(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    reqwest::Url::parse(value).with_context(|| format!("{name} is not a valid URL"))?;
    Ok(())
}
