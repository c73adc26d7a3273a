//! AES-256-GCM primitives.
//!
//! This module is free of HTTP and key-service dependencies. It works on raw
//! bytes; base64 framing belongs to the envelope layer.
//!
//! # Parameters
//!
//! ```text
//! key 32 bytes | iv 12 bytes (random per call) | tag 16 bytes | no AAD
//! ```

pub mod cipher;

pub use cipher::{CipherError, SealedPayload, KEY_LEN};
