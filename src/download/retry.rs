//! Retry logic with exponential backoff for transient download failures.
//!
//! When an aggregator or download request fails, the error is classified
//! into a [`FailureType`]; the [`RetryPolicy`] then decides whether to retry
//! and with what delay. Retries are transparent to the queue: a download
//! only fails once the policy gives up.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;

/// Default maximum retry attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Base delay for exponential backoff.
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Delay cap.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Multiplier applied per attempt.
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays.
const MAX_JITTER: Duration = Duration::from_millis(100);

/// HTTP status codes that warrant a retry.
const STATUS_FORCELIST: [u16; 4] = [500, 502, 503, 504];

/// Classification of download failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry: timeouts, connection
    /// failures, a status in the forcelist.
    Transient,

    /// Failure that won't succeed regardless of retries.
    Permanent,

    /// Server rate limiting (HTTP 429): retryable with backoff.
    RateLimited,
}

/// Decision on whether to retry a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed).
        attempt: u32,
    },

    /// Give up.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// Delay formula: `min(base_delay * multiplier^attempt, max_delay) + jitter`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with a custom attempt count, defaults otherwise.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Maximum number of attempts (including the initial one).
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether to retry after attempt number `attempt` failed with
    /// `failure_type`.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(attempt - 1);
        let delay_ms = base_ms * f64::from(self.backoff_multiplier).powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    /// Random jitter to avoid thundering-herd retries.
    fn calculate_jitter(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// Classifies a download error for retry decisions.
#[instrument]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),
        DownloadError::Timeout { .. } => FailureType::Transient,
        DownloadError::Network { .. } => FailureType::Transient,
        DownloadError::Io { .. }
        | DownloadError::InvalidUrl { .. }
        | DownloadError::LinkBroken { .. }
        | DownloadError::LimitReached { .. }
        | DownloadError::ClientNotWorking { .. }
        | DownloadError::CorruptPayload { .. } => FailureType::Permanent,
    }
}

fn classify_http_status(status: u16) -> FailureType {
    if STATUS_FORCELIST.contains(&status) {
        FailureType::Transient
    } else if status == 429 {
        FailureType::RateLimited
    } else {
        FailureType::Permanent
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::blocklist::BlocklistReason;

    #[test]
    fn test_forcelist_statuses_are_transient() {
        for status in STATUS_FORCELIST {
            let error = DownloadError::http_status("http://example.com", status);
            assert_eq!(classify_error(&error), FailureType::Transient);
        }
    }

    #[test]
    fn test_client_errors_are_permanent() {
        for status in [400, 401, 403, 404, 410] {
            let error = DownloadError::http_status("http://example.com", status);
            assert_eq!(classify_error(&error), FailureType::Permanent);
        }
    }

    #[test]
    fn test_429_is_rate_limited() {
        let error = DownloadError::http_status("http://example.com", 429);
        assert_eq!(classify_error(&error), FailureType::RateLimited);
    }

    #[test]
    fn test_domain_conditions_never_retry() {
        let error = DownloadError::link_broken(BlocklistReason::LinkBroken);
        assert_eq!(classify_error(&error), FailureType::Permanent);
    }

    #[test]
    fn test_should_retry_respects_max_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 5);

        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 5),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_permanent_never_retries() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.should_retry(FailureType::Permanent, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_delays_grow_and_stay_capped() {
        let policy = RetryPolicy::default();
        let d1 = policy.calculate_delay(1);
        let d3 = policy.calculate_delay(3);
        assert!(d3 >= d1);
        assert!(policy.calculate_delay(30) <= DEFAULT_MAX_DELAY + MAX_JITTER);
    }
}
