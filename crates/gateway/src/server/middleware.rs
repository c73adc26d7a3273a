//! Axum middleware settings applied to the router.
//!
//! Includes request tracing, timeout enforcement, body limits, and response
//! compression.

use std::time::Duration;

use crate::flags::DeadlinePolicy;

/// Slack added on top of the slowest dependency chain before the outer
/// request timeout fires.
pub const TIMEOUT_HEADROOM: Duration = Duration::from_secs(5);

/// Outer per-request timeout.
///
/// Covers one key issuance, the longest backend deadline, and one key fetch
/// for response decryption, so the inner deadlines always fire first and are
/// reported with their own error codes.
pub fn request_timeout(deadlines: &DeadlinePolicy, key_service_timeout: Duration) -> Duration {
    deadlines.longest() + key_service_timeout * 2 + TIMEOUT_HEADROOM
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outer_timeout_exceeds_inner_deadlines() {
        let policy = DeadlinePolicy::new(Duration::from_secs(30), Duration::from_secs(120), "");
        let outer = request_timeout(&policy, Duration::from_secs(10));
        assert_eq!(outer, Duration::from_secs(145));
        assert!(outer > policy.longest());
    }
}
