//! Bounded retry with exponential backoff for collaborator calls.
//!
//! Only outbound Generator/Reviewer invocations go through here. A failing
//! program is never retried by this engine; that is the task loop's job.

use anyhow::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryConfig;

/// Substrings that mark an error message as transient.
const TRANSIENT_MARKERS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "too many requests",
    "429",
    "service unavailable",
    "503",
    "timeout",
    "timed out",
    "connection reset",
    "connection",
    "network",
    "internal server error",
    "500",
    "bad gateway",
    "502",
    "gateway timeout",
    "504",
    "529",
    "overloaded",
    "capacity",
];

/// Fraction of the delay used as the jitter band on either side.
const JITTER_FRACTION: f64 = 0.1;

/// Backoff parameters for one kind of outbound call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RetryPolicy {
    /// Total number of calls, the first one included.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            exponential_base: config.exponential_base,
            jitter: config.jitter,
        }
    }

    /// Delay before retry `attempt` (0-indexed).
    ///
    /// `min(max_delay, base_delay * exponential_base^attempt)`, with an
    /// optional uniform ±10% jitter. The cap also holds after jitter, and the
    /// result is never negative.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        let capped = raw.min(max);

        let delay = if self.jitter && capped > 0.0 {
            let band = capped * JITTER_FRACTION;
            (capped + rand::thread_rng().gen_range(-band..=band)).min(max)
        } else {
            capped
        };

        if delay.is_finite() && delay > 0.0 {
            Duration::from_secs_f64(delay)
        } else {
            Duration::ZERO
        }
    }
}

/// Whether `err` is worth another attempt.
///
/// Typed errors anywhere in the chain are checked first; otherwise the full
/// message is matched case-insensitively against the transient markers.
pub(crate) fn is_retryable(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if is_transient_io(io.kind()) {
                return true;
            }
        }
        if cause.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return true;
        }
        if let Some(http) = cause.downcast_ref::<reqwest::Error>() {
            if http.is_timeout() || http.is_connect() {
                return true;
            }
            if http
                .status()
                .is_some_and(|s| s.as_u16() == 429 || s.is_server_error())
            {
                return true;
            }
        }
    }

    let message = format!("{err:#}").to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| message.contains(m))
}

fn is_transient_io(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind;
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::TimedOut
            | ErrorKind::BrokenPipe
            | ErrorKind::Interrupted
            | ErrorKind::UnexpectedEof
    )
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the policy's attempts are used up. The last error is returned unchanged.
pub(crate) async fn invoke_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0usize;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if !is_retryable(&e) {
                    warn!("{} failed with non-retryable error: {:#}", label, e);
                    return Err(e);
                }
                if attempt >= max_attempts {
                    warn!("{} failed after {} attempts: {:#}", label, attempt, e);
                    return Err(e);
                }

                let delay =
                    policy.calculate_delay(u32::try_from(attempt - 1).unwrap_or(u32::MAX));
                warn!(
                    event = "retry",
                    call = label,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %format!("{e:#}"),
                    "{} failed, retrying in {:.2}s",
                    label,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_first_delay_is_base_delay() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.calculate_delay(0), Duration::from_millis(1_000));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(2_000));
    }

    #[test]
    fn test_delay_is_monotone_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(3_000),
            exponential_base: 2.0,
            jitter: false,
        };
        let delays: Vec<Duration> = (0..12).map(|n| policy.calculate_delay(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]), "{delays:?}");
        assert!(delays.iter().all(|d| *d <= policy.max_delay));
        assert_eq!(delays[11], policy.max_delay);
    }

    #[test]
    fn test_huge_attempt_number_stays_capped() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.calculate_delay(u32::MAX), policy.max_delay);
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let d = policy.calculate_delay(0).as_secs_f64();
            assert!((0.9..=1.1).contains(&d), "{d}");
        }
    }

    #[test]
    fn test_jitter_never_exceeds_max_delay() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            exponential_base: 2.0,
            jitter: true,
        };
        for attempt in [2, 3, 10] {
            for _ in 0..200 {
                let d = policy.calculate_delay(attempt);
                assert!(d <= policy.max_delay, "attempt {attempt}: {d:?}");
                assert!(d >= Duration::from_millis(360), "attempt {attempt}: {d:?}");
            }
        }
    }

    #[test]
    fn test_retryable_markers() {
        assert!(is_retryable(&anyhow::anyhow!("Rate limit exceeded")));
        assert!(is_retryable(&anyhow::anyhow!("HTTP 503 Service Unavailable")));
        assert!(is_retryable(&anyhow::anyhow!("request timed out")));
        assert!(is_retryable(&anyhow::anyhow!("model is overloaded")));
        assert!(!is_retryable(&anyhow::anyhow!("invalid api key")));
        assert!(!is_retryable(&anyhow::anyhow!("model not found")));
    }

    #[test]
    fn test_retryable_io_kind_in_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err = anyhow::Error::new(io).context("writing prompt");
        assert!(is_retryable(&err));

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(!is_retryable(&anyhow::Error::new(io)));
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = invoke_with_retry(&fast_policy(3), "test", || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    anyhow::bail!("429 too many requests");
                }
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_propagates_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<()> = invoke_with_retry(&fast_policy(5), "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { anyhow::bail!("invalid api key") }
        })
        .await;
        assert_eq!(result.unwrap_err().to_string(), "invalid api key");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_last_error_propagates_after_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<()> = invoke_with_retry(&fast_policy(3), "test", || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { anyhow::bail!("connection reset on try {n}") }
        })
        .await;
        assert_eq!(
            result.unwrap_err().to_string(),
            "connection reset on try 2"
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
