//! Retry policy for transient host API failures.

use std::time::Duration;

use reqwest::header::HeaderMap;

/// Upper bound for a single backoff sleep.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Bounded exponential backoff settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms.max(1)),
        }
    }

    /// Whether another attempt is allowed after `attempt` (1-indexed) failed.
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the attempt following `attempt`.
    ///
    /// A server-provided `Retry-After` wins over the exponential schedule.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(wait) = retry_after {
            return wait.min(MAX_RETRY_DELAY);
        }
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(MAX_RETRY_DELAY)
    }
}

/// How safely a request can be replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Reads; replaying cannot change anything.
    Read,
    /// Commits, refs and pull requests. A 5xx or a timeout may arrive after
    /// the write was applied, so these are replayed only when the server
    /// provably rejected the request.
    Write,
}

/// Statuses worth retrying.
///
/// Rate limits are retried for every request kind. Server errors are retried
/// for reads only. GitHub reports secondary rate limits as 403 with
/// `retry-after` or an exhausted `x-ratelimit-remaining`; other 403s are
/// permission errors.
pub fn is_retryable_status(status: u16, headers: &HeaderMap, kind: RequestKind) -> bool {
    match status {
        429 => true,
        500..=599 => kind == RequestKind::Read,
        403 => {
            headers.contains_key(reqwest::header::RETRY_AFTER)
                || headers
                    .get("x-ratelimit-remaining")
                    .and_then(|value| value.to_str().ok())
                    .is_some_and(|value| value.trim() == "0")
        }
        _ => false,
    }
}

/// A failed connect never reached the server; a timeout might have.
pub fn is_retryable_transport_error(error: &reqwest::Error, kind: RequestKind) -> bool {
    error.is_connect() || (kind == RequestKind::Read && error.is_timeout())
}

/// Parse `Retry-After` given in seconds.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Shorten a response body for inclusion in an error message.
pub fn truncate_for_error(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn backoff_doubles_and_is_capped() {
        let policy = RetryPolicy::new(5, 100);
        assert_eq!(policy.delay(1, None), Duration::from_millis(100));
        assert_eq!(policy.delay(2, None), Duration::from_millis(200));
        assert_eq!(policy.delay(3, None), Duration::from_millis(400));
        assert_eq!(policy.delay(30, None), MAX_RETRY_DELAY);
    }

    #[test]
    fn retry_after_overrides_schedule() {
        let policy = RetryPolicy::new(3, 100);
        assert_eq!(
            policy.delay(1, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(
            policy.delay(1, Some(Duration::from_secs(3600))),
            MAX_RETRY_DELAY
        );
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = RetryPolicy::new(2, 1);
        assert!(policy.can_retry(1));
        assert!(!policy.can_retry(2));
        assert!(!RetryPolicy::new(0, 1).can_retry(1));
    }

    #[test]
    fn classifies_statuses() {
        use RequestKind::{Read, Write};

        let empty = HeaderMap::new();
        assert!(is_retryable_status(429, &empty, Read));
        assert!(is_retryable_status(502, &empty, Read));
        assert!(!is_retryable_status(404, &empty, Read));
        assert!(!is_retryable_status(422, &empty, Read));
        assert!(!is_retryable_status(403, &empty, Read));

        let mut limited = HeaderMap::new();
        limited.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        assert!(is_retryable_status(403, &limited, Read));
    }

    #[test]
    fn writes_retry_only_rejected_requests() {
        use RequestKind::Write;

        let empty = HeaderMap::new();
        assert!(is_retryable_status(429, &empty, Write));
        assert!(!is_retryable_status(500, &empty, Write));
        assert!(!is_retryable_status(502, &empty, Write));

        let mut limited = HeaderMap::new();
        limited.insert(reqwest::header::RETRY_AFTER, HeaderValue::from_static("1"));
        assert!(is_retryable_status(403, &limited, Write));
    }

    #[test]
    fn parses_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));
        headers.insert(
            reqwest::header::RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn truncates_long_bodies() {
        assert_eq!(truncate_for_error("  short ", 10), "short");
        assert_eq!(truncate_for_error("abcdef", 3), "abc...");
    }
}
