//! Retry with exponential backoff and jitter.
//!
//! Used for artifact downloads and catalogue fetches. A `RateLimited` error
//! carrying a `Retry-After` value overrides the computed delay.

use crate::AddonkitError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behaviour.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Randomise each delay between 0.5x and 1.5x.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (0-indexed), doubling each time.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_secs = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());

        let final_secs = if self.jitter {
            let jitter_factor = rand::rng().random_range(0.5..1.5);
            (capped_secs * jitter_factor).min(self.max_delay.as_secs_f64())
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }
}

/// Retry an operation that fails with [`AddonkitError`], retrying only
/// errors for which [`AddonkitError::is_retryable`] holds.
///
/// Returns the final result and the number of attempts made.
pub async fn retry_async<F, Fut, T>(config: &RetryConfig, mut operation: F) -> (Result<T, AddonkitError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AddonkitError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Operation succeeded after {} attempts", attempt);
                }
                return (Ok(value), attempt);
            }
            Err(e) if !e.is_retryable() => return (Err(e), attempt),
            Err(e) if attempt >= config.max_attempts => {
                warn!(
                    "All {} attempts exhausted. Last error: {}",
                    config.max_attempts, e
                );
                return (Err(e), attempt);
            }
            Err(e) => {
                let delay = match &e {
                    AddonkitError::RateLimited {
                        retry_after_secs: Some(secs),
                        ..
                    } => Duration::from_secs(*secs).min(config.max_delay),
                    _ => config.calculate_delay(attempt - 1),
                };
                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt, config.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
