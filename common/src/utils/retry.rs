use std::{fmt::Display, future::Future, time::Duration};

use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::warn;

use crate::error::BackendError;

/// Failures that a retry wrapper may try again.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for BackendError {
    fn is_transient(&self) -> bool {
        BackendError::is_transient(self)
    }
}

/// Bounded exponential backoff shared by every outbound client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Hint handed to callers once the attempt budget is spent.
    pub retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(250), Duration::from_secs(4))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            retry_after: Duration::from_secs(30),
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Delays between attempts: `base * 2^n`, capped at `max_delay`, with full jitter.
    pub fn backoff(&self) -> impl Iterator<Item = Duration> {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        ExponentialBackoff::from_millis(2)
            .factor(base_ms / 2)
            .max_delay(self.max_delay)
            .map(jitter)
            .take(self.max_attempts.saturating_sub(1))
    }
}

/// Run `action` until it succeeds, fails permanently, or the policy's attempt budget is spent.
///
/// The last error is returned unchanged so callers can map it to their own taxonomy.
pub async fn retry_transient<T, E, A, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    action: A,
) -> Result<T, E>
where
    A: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    RetryIf::spawn(policy.backoff(), action, |err: &E| {
        let transient = err.is_transient();
        if transient {
            warn!(operation, error = %err, "Transient failure");
        }
        transient
    })
    .await
}
