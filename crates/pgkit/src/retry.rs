//! Retry policy and transient-error classification.

use std::time::Duration;

use serde::Deserialize;

use crate::PgKitError;

/// Network error codes treated as transient.
pub const TRANSIENT_NETWORK_CODES: &[&str] = &[
    "ECONNRESET",
    "ECONNREFUSED",
    "ECONNABORTED",
    "ETIMEDOUT",
    "EPIPE",
    "ENOTFOUND",
    "EAI_AGAIN",
    "EHOSTUNREACH",
    "ENETUNREACH",
];

/// SQLSTATEs treated as transient (class 08 is matched separately).
pub const TRANSIENT_SQLSTATES: &[&str] = &[
    "40P01", // deadlock_detected
    "40001", // serialization_failure
    "57P01", // admin_shutdown
    "57P03", // cannot_connect_now
];

/// Retry policy for query execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 250,
            max_delay_ms: 5000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay_ms,
            max_delay_ms,
        }
    }

    /// Delay after the given failed attempt (0-indexed): `min(initial * 2^attempt, max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay_ms = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// Returns true if the code denotes a transient failure.
pub fn is_transient_code(code: &str) -> bool {
    TRANSIENT_NETWORK_CODES.contains(&code)
        || TRANSIENT_SQLSTATES.contains(&code)
        || (code.len() == 5 && code.starts_with("08"))
}

/// Returns true if the error is eligible for retry.
///
/// Both the error's own code and the code of its cause are inspected.
pub fn is_transient(err: &PgKitError) -> bool {
    err.code().map(is_transient_code).unwrap_or(false)
        || err.cause_code().map(is_transient_code).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay_ms, 250);
        assert_eq!(policy.max_delay_ms, 5000);
    }

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicy::new(5, 100, 5000);

        // Attempt 0: initial delay
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        // Attempt 1: 100 * 2^1 = 200
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        // Attempt 5: 100 * 2^5 = 3200
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(3200));
        // Attempt 6: 6400, capped at 5000
        assert_eq!(policy.delay_for_attempt(6), Duration::from_millis(5000));
        // Huge attempts saturate instead of overflowing
        assert_eq!(policy.delay_for_attempt(200), Duration::from_millis(5000));
    }

    #[test]
    fn test_transient_codes() {
        for code in ["ECONNRESET", "ECONNREFUSED", "ETIMEDOUT", "EPIPE", "ENOTFOUND", "EHOSTUNREACH"] {
            assert!(is_transient_code(code), "{}", code);
        }
        for code in ["40P01", "40001", "57P01", "57P03", "08000", "08006", "08P01"] {
            assert!(is_transient_code(code), "{}", code);
        }
        for code in ["42P01", "23505", "57P02", "22P02", "EACCES"] {
            assert!(!is_transient_code(code), "{}", code);
        }
    }

    #[test]
    fn test_is_transient_inspects_cause() {
        assert!(is_transient(&PgKitError::connection_with_code("reset", "ECONNRESET")));
        assert!(is_transient(&PgKitError::query("wrapped").with_cause_code("40001")));
        assert!(!is_transient(&PgKitError::query_with_code("missing", "42P01")));
        assert!(!is_transient(&PgKitError::Configuration("x".to_string())));
    }

    #[test]
    fn test_deserialize_partial_policy() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_retries": 5}"#).unwrap();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.initial_delay_ms, 250);
    }
}
