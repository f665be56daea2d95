use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each subsequent one
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before attempt `attempt + 1`, given `attempt` already failed
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, is_retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && is_retryable(&e) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "Attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
