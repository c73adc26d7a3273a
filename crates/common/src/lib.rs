//! Envelope wire types, envelope detection, and client-visible errors shared
//! across the gateway crates.

pub mod error;
pub mod protocol;

pub use error::ServiceError;
pub use protocol::{looks_like_envelope, Envelope};
