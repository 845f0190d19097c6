//! Bounded retry with exponential backoff and Retry-After honoring
//!
//! Wraps every external call in the pipeline. Rate-limit and transient
//! failures back off on separate curves; permanent failures propagate
//! immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

/// Longest wait after a rate-limit response
const RATE_LIMIT_CAP: Duration = Duration::from_secs(120);
/// Longest wait after a transient failure
const TRANSIENT_CAP: Duration = Duration::from_secs(30);

/// Parse an HTTP `Retry-After` header value
///
/// Two forms per RFC 7231: delay in whole seconds, or an HTTP-date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = when.signed_duration_since(chrono::Utc::now());
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Retry policy for fallible external calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Jitter-free wait before the retry following failed attempt
    /// `attempt` (1-based), or `None` when the error must not be retried
    ///
    /// A supplied Retry-After is honored exactly; otherwise the wait is
    /// `min(2^attempt * base + jitter, cap)` with base 2s/cap 120s for
    /// rate limits and base 1s/cap 30s for transient failures. Kept pure
    /// so the backoff law is testable on its own.
    pub fn base_delay(&self, attempt: u32, error: &Error) -> Option<Duration> {
        match error {
            Error::RateLimited {
                retry_after: Some(wait),
            } => Some(*wait),
            Error::RateLimited { retry_after: None } => {
                Some(exponential(attempt, 2).min(RATE_LIMIT_CAP))
            }
            Error::Transient(_) => Some(exponential(attempt, 1).min(TRANSIENT_CAP)),
            _ => None,
        }
    }

    /// Wait before the next attempt, with jitter applied to the computed
    /// branches (never to an explicit Retry-After)
    fn delay_for(&self, attempt: u32, error: &Error) -> Option<Duration> {
        let base = self.base_delay(attempt, error)?;
        let jittered = match error {
            Error::RateLimited {
                retry_after: Some(_),
            } => base,
            Error::RateLimited { retry_after: None } => {
                (base + jitter_up_to(Duration::from_secs(2))).min(RATE_LIMIT_CAP)
            }
            _ => (base + jitter_up_to(Duration::from_secs(1))).min(TRANSIENT_CAP),
        };
        Some(jittered)
    }

    /// Run `operation` until it succeeds, fails permanently, or the
    /// attempt budget is spent (then the last error is wrapped in
    /// `RetriesExhausted`)
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let Some(delay) = self.delay_for(attempt, &err) else {
                        return Err(err);
                    };
                    if attempt >= self.max_attempts {
                        return Err(Error::RetriesExhausted {
                            attempts: attempt,
                            source: Box::new(err),
                        });
                    }
                    tracing::warn!(
                        "{} attempt {}/{} failed ({}), retrying in {:.1}s",
                        op_name,
                        attempt,
                        self.max_attempts,
                        err,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn exponential(attempt: u32, base_secs: u64) -> Duration {
    // 1 << 20 seconds is already far past both caps
    let factor = 1u64 << attempt.min(20);
    Duration::from_secs(factor.saturating_mul(base_secs))
}

fn jitter_up_to(max: Duration) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..=max.as_millis() as u64))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn rate_limit_backoff_is_monotonic_and_capped() {
        let policy = RetryPolicy::new(10);
        let err = Error::RateLimited { retry_after: None };

        let mut previous = Duration::ZERO;
        for attempt in 1..=10 {
            let delay = policy.base_delay(attempt, &err).unwrap();
            assert!(delay >= previous, "attempt {attempt} decreased");
            assert!(delay <= Duration::from_secs(120));
            previous = delay;
        }
        // First waits double from 4s before hitting the cap
        assert_eq!(policy.base_delay(1, &err).unwrap(), Duration::from_secs(4));
        assert_eq!(policy.base_delay(2, &err).unwrap(), Duration::from_secs(8));
        assert_eq!(
            policy.base_delay(6, &err).unwrap(),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn transient_backoff_is_capped_at_30s() {
        let policy = RetryPolicy::new(10);
        let err = Error::transient("connection reset");
        assert_eq!(policy.base_delay(1, &err).unwrap(), Duration::from_secs(2));
        assert_eq!(policy.base_delay(3, &err).unwrap(), Duration::from_secs(8));
        for attempt in 1..=10 {
            assert!(policy.base_delay(attempt, &err).unwrap() <= Duration::from_secs(30));
        }
    }

    #[test]
    fn retry_after_is_honored_exactly() {
        let policy = RetryPolicy::new(5);
        let err = Error::RateLimited {
            retry_after: Some(Duration::from_secs(17)),
        };
        for attempt in 1..=5 {
            assert_eq!(
                policy.base_delay(attempt, &err).unwrap(),
                Duration::from_secs(17)
            );
        }
    }

    #[test]
    fn permanent_errors_do_not_back_off() {
        let policy = RetryPolicy::new(5);
        assert!(policy
            .base_delay(1, &Error::permanent("401 unauthorized"))
            .is_none());
        assert!(policy
            .base_delay(1, &Error::invalid_input("empty"))
            .is_none());
    }

    #[test]
    fn parses_retry_after_seconds() {
        assert_eq!(parse_retry_after("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after(" 120 "), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn parses_retry_after_http_date() {
        let when = chrono::Utc::now() + chrono::Duration::seconds(60);
        let parsed = parse_retry_after(&when.to_rfc2822()).unwrap();
        assert!(parsed >= Duration::from_secs(58) && parsed <= Duration::from_secs(61));

        // Dates in the past clamp to zero rather than failing
        let past = chrono::Utc::now() - chrono::Duration::seconds(30);
        assert_eq!(parse_retry_after(&past.to_rfc2822()), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn run_recovers_from_transient_failures() {
        let policy = RetryPolicy::new(5);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let result = policy
            .run("test_op", move || {
                let calls = calls_in_op.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::transient("flaky"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_immediately_on_permanent_error() {
        let policy = RetryPolicy::new(5);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let result: Result<()> = policy
            .run("test_op", move || {
                let calls = calls_in_op.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::permanent("bad request"))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_tags_exhaustion_with_last_error() {
        let policy = RetryPolicy::new(3);
        let result: Result<()> = policy
            .run("test_op", || async {
                Err(Error::RateLimited { retry_after: None })
            })
            .await;

        match result {
            Err(Error::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, Error::RateLimited { .. }));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }
}
