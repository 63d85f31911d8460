//! Retry classification and exponential backoff for provider calls.
//!
//! Providers surface transient failures as HTTP status codes or message
//! substrings; `is_retryable` decides whether a failed call is worth
//! repeating, `parse_retry_after` honors the server's own pacing hint, and
//! `compute_delay` produces the capped, jittered backoff schedule.

use chrono::{DateTime, Utc};
use rand::Rng;

/// Status codes that always warrant a retry.
const RETRYABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 529];

/// Message fragments that mark a transient failure.
const RETRYABLE_FRAGMENTS: [&str; 9] = [
    "rate limit",
    "too many requests",
    "overloaded",
    "service unavailable",
    "bad gateway",
    "internal server error",
    "econnreset",
    "etimedout",
    "socket hang up",
];

/// Backoff schedule parameters.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetryConfig {
    /// Maximum retry attempts after the initial call.
    pub max_retries: u32,
    /// First delay in milliseconds.
    pub base_delay_ms: u64,
    /// Hard cap on any single delay.
    pub max_delay_ms: u64,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Whether a provider failure should be retried.
///
/// Either the status code is in the retryable set, or the error message
/// contains one of the known transient fragments (case-insensitive).
pub fn is_retryable_error(status: Option<u16>, message: &str) -> bool {
    if let Some(code) = status {
        if RETRYABLE_STATUS.contains(&code) {
            return true;
        }
    }
    let lower = message.to_lowercase();
    RETRYABLE_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
}

/// Parse a `Retry-After` header value into milliseconds from now.
///
/// Accepts either integer seconds or an HTTP-date. Zero, negative, past
/// dates, and unparseable values all yield `None`.
pub fn parse_retry_after(value: &str) -> Option<u64> {
    let trimmed = value.trim();

    if let Ok(secs) = trimmed.parse::<i64>() {
        if secs <= 0 {
            return None;
        }
        return Some((secs as u64).saturating_mul(1_000));
    }

    if let Ok(when) = DateTime::parse_from_rfc2822(trimmed) {
        let delta_ms = when
            .with_timezone(&Utc)
            .signed_duration_since(Utc::now())
            .num_milliseconds();
        if delta_ms > 0 {
            return Some(delta_ms as u64);
        }
    }

    None
}

/// Compute the delay before retry `attempt` (0-based).
///
/// `base * multiplier^attempt` plus up to half that again as jitter, floored
/// by any server-provided `Retry-After`, then capped at `max_delay_ms`.
pub fn compute_delay(attempt: u32, config: &RetryConfig, retry_after_ms: Option<u64>) -> u64 {
    let base = config.base_delay_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let jitter = (rand::thread_rng().r#gen::<f64>() * (base / 2.0)) as u64;
    let mut delay = base as u64 + jitter;
    delay = delay.max(retry_after_ms.unwrap_or(0));
    delay.min(config.max_delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_status_codes() {
        for code in [429u16, 500, 502, 503, 529] {
            assert!(is_retryable_error(Some(code), ""), "code {code}");
        }
        assert!(!is_retryable_error(Some(400), ""));
        assert!(!is_retryable_error(Some(401), ""));
    }

    #[test]
    fn retryable_message_fragments() {
        assert!(is_retryable_error(None, "Rate limit exceeded"));
        assert!(is_retryable_error(None, "upstream ECONNRESET"));
        assert!(is_retryable_error(None, "socket hang up"));
        assert!(!is_retryable_error(None, "invalid api key"));
    }

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after("5"), Some(5_000));
        assert_eq!(parse_retry_after(" 12 "), Some(12_000));
    }

    #[test]
    fn retry_after_zero_and_negative_rejected() {
        assert_eq!(parse_retry_after("0"), None);
        assert_eq!(parse_retry_after("-3"), None);
    }

    #[test]
    fn retry_after_http_date_future() {
        let future = (Utc::now() + chrono::Duration::seconds(60)).to_rfc2822();
        let parsed = parse_retry_after(&future).expect("future date should parse");
        assert!(parsed > 50_000 && parsed <= 61_000, "parsed = {parsed}");
    }

    #[test]
    fn retry_after_past_date_rejected() {
        let past = (Utc::now() - chrono::Duration::seconds(60)).to_rfc2822();
        assert_eq!(parse_retry_after(&past), None);
    }

    #[test]
    fn retry_after_garbage_rejected() {
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[test]
    fn delay_grows_and_caps() {
        let config = RetryConfig::default();
        // attempt 0: base 1000, jitter < 500
        let d0 = compute_delay(0, &config, None);
        assert!((1_000..1_500).contains(&d0), "d0 = {d0}");
        // attempt 10 would be ~1M ms uncapped; must hit the cap
        let d10 = compute_delay(10, &config, None);
        assert_eq!(d10, config.max_delay_ms);
    }

    #[test]
    fn delay_honors_retry_after_floor() {
        let config = RetryConfig::default();
        let d = compute_delay(0, &config, Some(10_000));
        assert!(d >= 10_000);
        assert!(d <= config.max_delay_ms);
    }

    #[test]
    fn retry_after_beyond_cap_still_capped() {
        let config = RetryConfig::default();
        let d = compute_delay(0, &config, Some(120_000));
        assert_eq!(d, config.max_delay_ms);
    }
}
