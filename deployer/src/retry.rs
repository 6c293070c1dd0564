//! Fixed-delay retry driver shared by the readiness poller and the exec runner

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Fixed-delay retry policy
///
/// `max_attempts` counts every attempt including the first one; `delay` is
/// waited between two consecutive attempts and never after the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts
    pub max_attempts: u32,

    /// Delay between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Policy for waiting on workload readiness: 12 attempts, 15s apart
    pub const fn workload_ready() -> Self {
        Self::new(12, Duration::from_secs(15))
    }

    /// Policy for re-opening exec channels: 8 attempts, 5s apart
    pub const fn exec_channel() -> Self {
        Self::new(8, Duration::from_secs(5))
    }

    /// Total time spent sleeping when every attempt fails
    pub fn budget(&self) -> Duration {
        self.delay * self.max_attempts.saturating_sub(1)
    }
}

/// Why a retried operation did not succeed
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error; carries the last one
    Exhausted { last: E, attempts: u32 },

    /// An attempt failed with a non-retryable error
    Fatal { error: E, attempts: u32 },

    /// Cancelled while waiting for the next attempt
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::Fatal { attempts, .. }
            | RetryError::Cancelled { attempts } => *attempts,
        }
    }
}

/// Run `op` until it succeeds, fails fatally, or the policy is exhausted
///
/// `op` receives the 1-based attempt number. Returns the value together with
/// the attempt it succeeded on.
pub async fn retry<T, E, Op, Fut, P, S, SF>(
    policy: &RetryPolicy,
    sleep_fn: S,
    cancel: &CancellationToken,
    is_retryable: P,
    mut op: Op,
) -> Result<(T, u32), RetryError<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    S: Fn(Duration) -> SF,
    SF: Future<Output = ()>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) if !is_retryable(&error) => {
                return Err(RetryError::Fatal {
                    error,
                    attempts: attempt,
                });
            }
            Err(error) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    last: error,
                    attempts: attempt,
                });
            }
            Err(_) => {
                debug!(
                    "Attempt {}/{} failed, retrying in {:?}",
                    attempt, max_attempts, policy.delay
                );
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled { attempts: attempt });
            }
            _ = sleep_fn(policy.delay) => {}
        }

        attempt += 1;
    }
}
