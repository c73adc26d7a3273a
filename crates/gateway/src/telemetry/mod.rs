//! Structured logging and optional span export.
//!
//! # Telemetry invariants
//!
//! - **No key material, plaintext, ciphertext, or wrapped keys** in any span
//!   attribute or log field. Resource names, `key_id`s, statuses, and error
//!   kinds only.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`), overridden
//!   by `RUST_LOG` when set.

pub mod init;

pub use init::init_telemetry;
