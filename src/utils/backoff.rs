use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Result;
use crate::StoreError;

/// Exponential backoff state driven by a [`BackoffPolicy`].
///
/// The delay doubles on every failure up to `max_delay_ms`, with up to 10%
/// random jitter so that many collections recovering together do not relist
/// in lockstep.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    policy: BackoffPolicy,
    attempts: usize,
}

impl Backoff {
    pub(crate) fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the policy is exhausted
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if !self.policy.is_unlimited() && self.attempts >= self.policy.max_retries {
            return None;
        }
        let shift = self.attempts.min(16) as u32;
        self.attempts += 1;

        let base = self.policy.base_delay_ms.saturating_mul(1u64 << shift);
        let capped = base.min(self.policy.max_delay_ms);
        let jitter = if capped >= 10 {
            rand::thread_rng().gen_range(0..=capped / 10)
        } else {
            0
        };
        Some(Duration::from_millis(capped.saturating_sub(jitter)))
    }

    pub(crate) fn reset(&mut self) {
        self.attempts = 0;
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts
    }
}

/// Runs `task` under the policy timeout, retrying failed attempts with
/// exponential backoff.
///
/// `max_retries` bounds the total number of attempts; 0 retries forever.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    task: F,
    policy: BackoffPolicy,
) -> Result<P>
where
    F: Fn() -> T,
    T: std::future::Future<Output = Result<P>>,
{
    let mut backoff = Backoff::new(policy);
    loop {
        let err = match timeout(policy.timeout(), task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(e)) => {
                warn!(error = %e, "attempt failed");
                e
            }
            Err(_) => {
                warn!(timeout = ?policy.timeout(), "attempt timed out");
                StoreError::Timeout(policy.timeout()).into()
            }
        };

        match backoff.next_delay() {
            Some(delay) if policy.is_unlimited() || backoff.attempts() < policy.max_retries => {
                sleep(delay).await;
            }
            _ => {
                warn!(attempts = backoff.attempts(), "task failed after max retries");
                return Err(err);
            }
        }
    }
}
