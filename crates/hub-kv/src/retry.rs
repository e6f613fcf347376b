//! Exponential-backoff retry for transient failures (spec §4.5, §7).

use std::time::Duration;

use hub_core::error::{ErrorCategory, HubError};
use rand::Rng;

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt);
        let capped = exp.min(self.max_delay.as_millis() as u64);
        let jittered = rand::thread_rng().gen_range(capped / 2..=capped.max(1));
        Duration::from_millis(jittered)
    }

    /// Retries `op` while it returns a [`HubError`] whose category is
    /// [`ErrorCategory::Retryable`], up to `max_attempts` total tries.
    /// Non-retryable and fatal errors are returned immediately.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T, HubError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, HubError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.category() == ErrorCategory::Retryable => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    tokio::time::sleep(self.delay_for(attempt)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
