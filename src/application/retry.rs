//! Jittered exponential backoff for transient errors (§7), reused by the
//! generator's quote fetches (C3) and available to C9's broker calls.
//! Grounded in the teacher's `NetworkLatency` jitter model.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp_ms = self.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt);
        let capped_ms = exp_ms.min(self.max_delay.as_millis() as u64).max(1);
        let jitter_ms = rand::rng().random_range(0..=capped_ms / 2);
        Duration::from_millis(capped_ms / 2 + jitter_ms)
    }

    /// Retries `f` while `retryable(&err)` holds, up to `max_attempts`,
    /// sleeping a jittered exponential delay between attempts.
    pub async fn run<F, Fut, T, E>(&self, retryable: impl Fn(&E) -> bool, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < self.max_attempts && retryable(&e) => {
                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
