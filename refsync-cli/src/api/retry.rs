//! Retry policy for throttled or temporarily unavailable requests
//!
//! Only whole HTTP requests are retried. Item faults inside a `$batch`
//! response are never retried here.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};

/// Retry settings for HTTP calls against one environment
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries (for testing)
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Fewer, slower retries for long unattended runs
    pub fn conservative() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }

    /// Exponential backoff delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let delay = self.base_delay.mul_f64(factor.max(0.0));
        delay.min(self.max_delay)
    }

    /// Delay to wait after a failed response, `None` when no retry is due
    pub fn delay_for(&self, status: StatusCode, headers: &HeaderMap, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts || !is_retryable(status) {
            return None;
        }
        let delay = retry_after(headers).unwrap_or_else(|| self.backoff(attempt));
        Some(delay.min(self.max_delay))
    }
}

/// Throttling and transient unavailability
pub fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
    )
}

/// Parse a `Retry-After` header given in seconds
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
        assert_eq!(config.backoff(4), Duration::from_millis(500));
    }

    #[test]
    fn test_retry_after_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        let config = RetryConfig::default();

        assert_eq!(
            config.delay_for(StatusCode::TOO_MANY_REQUESTS, &headers, 1),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_no_retry_for_other_statuses_or_exhausted_attempts() {
        let headers = HeaderMap::new();
        let config = RetryConfig::default();

        assert_eq!(config.delay_for(StatusCode::BAD_REQUEST, &headers, 1), None);
        assert_eq!(
            config.delay_for(StatusCode::SERVICE_UNAVAILABLE, &headers, config.max_attempts),
            None
        );
        assert_eq!(
            RetryConfig::disabled().delay_for(StatusCode::TOO_MANY_REQUESTS, &headers, 1),
            None
        );
    }
}
