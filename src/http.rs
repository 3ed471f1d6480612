//! Shared HTTP helpers for the source and asset clients.
//!
//! Retry strategy:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors, timeouts included → retry (the image client instead
//!   treats a timeout as a degraded image and stops)
//! - Backoff: base, 2×base, 4×base … capped at 32×base

use reqwest::StatusCode;
use std::time::Duration;

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay(attempt: u32, base_ms: u64) -> Duration {
    let factor = 1u64 << (attempt.saturating_sub(1)).min(5);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

pub fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Ensure a base URL ends with exactly one `/`.
pub fn with_trailing_slash(base: &str) -> String {
    format!("{}/", base.trim_end_matches('/'))
}

/// Shorten a response body for error messages.
pub fn truncate(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1, 100), Duration::from_millis(100));
        assert_eq!(backoff_delay(2, 100), Duration::from_millis(200));
        assert_eq!(backoff_delay(3, 100), Duration::from_millis(400));
        assert_eq!(backoff_delay(6, 100), Duration::from_millis(3200));
        assert_eq!(backoff_delay(20, 100), Duration::from_millis(3200));
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn trailing_slash_is_normalised() {
        assert_eq!(with_trailing_slash("https://swapi.dev/api"), "https://swapi.dev/api/");
        assert_eq!(with_trailing_slash("https://swapi.dev/api//"), "https://swapi.dev/api/");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let long = "é".repeat(300);
        let short = truncate(&long);
        assert!(short.ends_with('…'));
        assert!(short.len() <= 200 + '…'.len_utf8());
    }
}
