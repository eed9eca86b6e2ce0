//! Bounded polling for data the upstream has not finished populating
//!
//! The upstream provider fills categories asynchronously, so an accessor read
//! right after a load may still report not-ready. [`poll`] re-runs an
//! operation until it succeeds, fails with an error the caller did not ask to
//! ignore, or the time budget runs out.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::duration_ms;
use crate::{ErrorKind, SessionError};

/// Poll interval and overall time budget for one call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
}

impl RetryPolicy {
    pub const fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self { poll_interval, timeout }
    }

    /// Budget for interactive requests.
    pub const fn interactive() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_secs(30))
    }

    /// Budget for background warm-up loads.
    pub const fn background() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(120))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::interactive()
    }
}

/// The time budget ran out while the operation kept reporting an ignored error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted {
    pub operation: String,
    pub elapsed: Duration,
    pub attempts: u32,
}

impl fmt::Display for RetryExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "max attempts exceeded for {} ({} attempts in {:?})",
            self.operation, self.attempts, self.elapsed
        )
    }
}

impl std::error::Error for RetryExhausted {}

/// Run `operation` until it succeeds or fails with an error `is_ignored` rejects.
///
/// Between attempts the task sleeps for the poll interval, shortened so the
/// last attempt lands on the deadline. The first attempt always runs, even
/// with a zero timeout.
pub async fn poll<T, E, F, Fut, P>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
    is_ignored: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: From<RetryExhausted> + fmt::Display,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Poll succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(err) if is_ignored(&err) => {
                let elapsed = start.elapsed();
                if elapsed >= policy.timeout {
                    warn!(
                        operation = operation_name,
                        attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Giving up: {}",
                        err
                    );
                    return Err(RetryExhausted {
                        operation: operation_name.to_string(),
                        elapsed,
                        attempts,
                    }
                    .into());
                }

                let wait = policy.poll_interval.min(policy.timeout - elapsed);
                trace!(
                    operation = operation_name,
                    attempts, "Ignoring '{}', waiting {:?}", err, wait
                );
                tokio::time::sleep(wait).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// [`poll`] for [`SessionError`], ignoring the listed error kinds.
pub async fn poll_ignoring<T, F, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    ignored: &[ErrorKind],
    operation: F,
) -> Result<T, SessionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SessionError>>,
{
    poll(operation_name, policy, operation, |err: &SessionError| {
        ignored.contains(&err.kind())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(interval_ms: u64, timeout_ms: u64) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(interval_ms), Duration::from_millis(timeout_ms))
    }

    #[tokio::test(start_paused = true)]
    async fn always_not_ready_times_out_at_the_deadline() {
        let attempts = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), SessionError> =
            poll_ignoring("laps", &policy(100, 1_000), &[ErrorKind::DataNotReady], || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(SessionError::not_ready(Category::Laps)) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LoadTimeout);
        assert_eq!(start.elapsed(), Duration::from_millis(1_000));
        // t = 0, 100, ..., 1000
        assert_eq!(attempts.load(Ordering::SeqCst), 11);
        match err {
            SessionError::LoadTimeout { operation, attempts, .. } => {
                assert_eq!(operation, "laps");
                assert_eq!(attempts, 11);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_shorter_than_interval_still_attempts() {
        let attempts = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), SessionError> =
            poll_ignoring("weather", &policy(1_000, 50), &[ErrorKind::DataNotReady], || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(SessionError::not_ready(Category::Weather)) }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::LoadTimeout);
        assert!(attempts.load(Ordering::SeqCst) >= 1);
        assert!(start.elapsed() <= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_makes_exactly_one_attempt() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), SessionError> =
            poll_ignoring("results", &policy(10, 0), &[ErrorKind::DataNotReady], || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(SessionError::not_ready(Category::Essentials)) }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::LoadTimeout);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unrelated_errors_pass_through_without_sleeping() {
        let attempts = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), SessionError> =
            poll_ignoring("laps", &policy(100, 10_000), &[ErrorKind::DataNotReady], || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(SessionError::upstream("connection reset")) }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Upstream);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_once_data_arrives() {
        let attempts = AtomicU32::new(0);
        let start = Instant::now();

        let value = poll_ignoring("laps", &policy(50, 500), &[ErrorKind::DataNotReady], || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 { Err(SessionError::not_ready(Category::Laps)) } else { Ok(n) }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn generic_poll_works_with_foreign_errors() {
        #[derive(Debug)]
        enum Probe {
            Busy,
            Exhausted(RetryExhausted),
        }

        impl fmt::Display for Probe {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:?}", self)
            }
        }

        impl From<RetryExhausted> for Probe {
            fn from(err: RetryExhausted) -> Self {
                Probe::Exhausted(err)
            }
        }

        let result: Result<(), Probe> =
            poll("probe", &policy(10, 30), || async { Err(Probe::Busy) }, |e| {
                matches!(e, Probe::Busy)
            })
            .await;

        match result {
            Err(Probe::Exhausted(exhausted)) => {
                assert_eq!(exhausted.attempts, 4);
                assert!(exhausted.to_string().contains("max attempts exceeded"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
