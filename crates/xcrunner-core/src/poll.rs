//! Time-bounded polling of boolean conditions.
//!
//! The poller calls a predicate, returns as soon as it yields `true`, and
//! otherwise sleeps for the configured delay and tries again until the
//! timeout has elapsed. Running out of time is an expected outcome and is
//! reported as `false`, never as an error.
//!
//! The deadline is only checked between attempts, so a slow predicate can
//! push the total time past the nominal timeout by up to one attempt.
//!
//! Blocking variants occupy the calling thread. The `_async` variants run on
//! tokio's clock and yield between attempts.

use std::convert::Infallible;
use std::future::Future;
use std::time::{Duration, Instant};

use tracing::trace;

/// Timeout and inter-attempt delay for a liveness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Total time budget for the poll.
    pub timeout: Duration,
    /// Sleep between failed attempts.
    pub delay: Duration,
}

impl PollPolicy {
    /// Policy used when waiting for an app to show up in the process listing.
    pub const APP_ALIVE: Self = Self::from_millis(4000, 300);

    /// Builds a policy from millisecond values.
    pub const fn from_millis(timeout_ms: u64, delay_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            delay: Duration::from_millis(delay_ms),
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::APP_ALIVE
    }
}

/// Polls `predicate` until it returns `true` or `timeout` elapses.
///
/// Returns `true` on the first successful attempt and `false` on timeout.
///
/// ```
/// use std::time::Duration;
/// use xcrunner_core::poll::retry_until_true;
///
/// let mut attempts = 0;
/// let ok = retry_until_true(Duration::from_secs(1), Duration::from_millis(10), || {
///     attempts += 1;
///     attempts == 3
/// });
/// assert!(ok);
/// assert_eq!(attempts, 3);
/// ```
pub fn retry_until_true(
    timeout: Duration,
    delay: Duration,
    mut predicate: impl FnMut() -> bool,
) -> bool {
    match try_retry_until_true(timeout, delay, || Ok::<_, Infallible>(predicate())) {
        Ok(done) => done,
        Err(never) => match never {},
    }
}

/// Like [`retry_until_true`], but stops at the first error the predicate returns.
///
/// # Errors
///
/// Returns the predicate's error unchanged. Errors are never retried.
pub fn try_retry_until_true<E>(
    timeout: Duration,
    delay: Duration,
    mut predicate: impl FnMut() -> Result<bool, E>,
) -> Result<bool, E> {
    let start = Instant::now();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if predicate()? {
            trace!(attempt, "poll condition met");
            return Ok(true);
        }
        std::thread::sleep(delay);
        if start.elapsed() >= timeout {
            trace!(attempt, ?timeout, "poll timed out");
            return Ok(false);
        }
    }
}

/// Async form of [`retry_until_true`], sleeping on tokio's timer.
pub async fn retry_until_true_async<F, Fut>(
    timeout: Duration,
    delay: Duration,
    mut predicate: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = try_retry_until_true_async(timeout, delay, || {
        let attempt = predicate();
        async move { Ok::<_, Infallible>(attempt.await) }
    })
    .await;
    match result {
        Ok(done) => done,
        Err(never) => match never {},
    }
}

/// Async form of [`try_retry_until_true`].
///
/// # Errors
///
/// Returns the predicate's error unchanged.
pub async fn try_retry_until_true_async<F, Fut, E>(
    timeout: Duration,
    delay: Duration,
    mut predicate: F,
) -> Result<bool, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let start = tokio::time::Instant::now();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if predicate().await? {
            trace!(attempt, "poll condition met");
            return Ok(true);
        }
        tokio::time::sleep(delay).await;
        if start.elapsed() >= timeout {
            trace!(attempt, ?timeout, "poll timed out");
            return Ok(false);
        }
    }
}
