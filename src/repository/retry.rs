//! Bounded retries for transient backend failures.
//!
//! Every ledger operation runs through [`with_retry`]: each attempt is capped
//! by a timeout, transient errors back off exponentially with full jitter,
//! and an exhausted budget surfaces as a permanent error.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use super::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Upper bound of the delay before retry number `attempt` (0-based).
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let factor = 1u64 << attempt.min(20);
        let ms = base_ms.saturating_mul(factor);
        Duration::from_millis(ms).min(self.max_delay)
    }

    /// Full jitter: uniform in `[0, backoff_ceiling(attempt)]`.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let ceiling_ms = self.backoff_ceiling(attempt).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms))
    }
}

/// Run `f` until it succeeds, fails non-transiently, or the budget runs out.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    op: &str,
    mut f: F,
) -> LedgerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LedgerResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        let result = match tokio::time::timeout(timeout, f()).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(timeout)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    return Err(LedgerError::Permanent(format!(
                        "{} failed after {} attempts: {}",
                        op, attempt, e
                    )));
                }
                let delay = policy.jittered_delay(attempt - 1);
                warn!(
                    "{} hit a transient error (attempt {}/{}), retrying in {:?}: {}",
                    op, attempt, policy.max_attempts, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
