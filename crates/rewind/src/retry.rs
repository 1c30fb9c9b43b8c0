//! Retry loop shared by segment, key and init-segment downloads.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::RewindError;

/// How often and how long to wait before trying again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// `tries` attempts in total, `delay` apart. Used for media segments.
    Fixed { tries: u32, delay: Duration },
    /// Doubling delay from `base` up to `cap`, with up to `base / 2` of jitter.
    Backoff {
        tries: u32,
        base: Duration,
        cap: Duration,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Backoff {
            tries: 4,
            base: Duration::from_millis(500),
            cap: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn fixed(tries: u32, delay: Duration) -> Self {
        Self::Fixed { tries, delay }
    }

    /// Total attempts, never less than one.
    pub fn tries(&self) -> u32 {
        match *self {
            Self::Fixed { tries, .. } | Self::Backoff { tries, .. } => tries.max(1),
        }
    }

    /// Wait before attempt `failed + 1`, given `failed` failures so far.
    fn pause_after(&self, failed: u32) -> Duration {
        match *self {
            Self::Fixed { delay, .. } => delay,
            Self::Backoff { base, cap, .. } => {
                let grown = base
                    .checked_mul(1u32.checked_shl(failed.saturating_sub(1)).unwrap_or(u32::MAX))
                    .unwrap_or(cap)
                    .min(cap);
                let spread = u64::try_from((base / 2).min(cap - grown).as_millis()).unwrap_or(0);
                if spread == 0 {
                    grown
                } else {
                    grown + Duration::from_millis(rand::rng().random_range(0..spread))
                }
            }
        }
    }
}

/// Outcome of one attempt.
pub enum RetryAction<T> {
    Success(T),
    /// Worth another attempt (network, short read, unexpected status).
    Retry(RewindError),
    Fail(RewindError),
}

/// Run `operation` until it succeeds, fails for good, runs out of tries or
/// `token` is cancelled. The closure receives the 0-based attempt number.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, RewindError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let tries = policy.tries();
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(RewindError::Cancelled);
        }

        let err = match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => err,
        };
        attempt += 1;
        if attempt >= tries {
            return Err(err);
        }

        let pause = policy.pause_after(attempt);
        warn!(
            attempt,
            tries,
            pause_ms = pause.as_millis() as u64,
            error = %err,
            "Attempt failed, retrying"
        );
        tokio::select! {
            _ = token.cancelled() => return Err(RewindError::Cancelled),
            _ = tokio::time::sleep(pause) => {}
        }
    }
}
