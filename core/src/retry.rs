//! Single-retry-with-backoff policy for transient probe failures.

use rand::{thread_rng, Rng};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { retries: 1, base_delay: Duration::from_millis(250) }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        RetryPolicy { retries: 0, base_delay: Duration::ZERO }
    }

    /// Delay before retry number `attempt` (1-based): exponential growth plus up to 25% jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.min(6)); // cap growth
        let jitter = thread_rng().gen_range(0..(exp / 4 + 1));
        Duration::from_millis(exp.saturating_add(jitter))
    }

    /// Run `op`, retrying while `is_transient` holds for its output and retries remain.
    pub async fn run<T, F, Fut>(&self, mut op: F, is_transient: impl Fn(&T) -> bool) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut attempts = 0;
        loop {
            let out = op().await;
            if attempts >= self.retries || !is_transient(&out) {
                return out;
            }
            attempts += 1;
            tokio::time::sleep(self.delay(attempts)).await;
        }
    }
}
