use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::CallError;

/// Hooks wired around each attempt. The `ServiceClient` implements this to
/// consult the destination's circuit breaker and keep its counters honest.
#[async_trait]
pub trait RetryObserver: Send + Sync {
    /// Whether the failed attempt is worth retrying. Must be `false` for
    /// client errors (4xx) and for destinations whose breaker is open.
    async fn should_retry(&self, error: &CallError) -> bool;

    /// Invoked before each retry with the attempt number that just failed.
    async fn on_retry(&self, attempt: u32, error: &CallError);

    /// Invoked once on eventual success.
    async fn on_success(&self);
}

/// Observer that retries purely on error classification.
pub struct ClassifyingObserver;

#[async_trait]
impl RetryObserver for ClassifyingObserver {
    async fn should_retry(&self, error: &CallError) -> bool {
        error.is_retryable()
    }

    async fn on_retry(&self, _attempt: u32, _error: &CallError) {}

    async fn on_success(&self) {}
}

/// Drives an operation through up to `max_retries` extra attempts with
/// exponential backoff and jitter. Exhausting retries surfaces the last
/// error unchanged.
pub struct RetryManager {
    config: RetryConfig,
}

impl RetryManager {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub async fn execute<F, Fut, T>(
        &self,
        mut operation: F,
        observer: &dyn RetryObserver,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut attempt: u32 = 0;
        let mut delay = self.config.initial_delay();

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => {
                    observer.on_success().await;
                    if attempt > 1 {
                        debug!("Retry succeeded on attempt {}", attempt);
                    }
                    return Ok(result);
                }
                Err(error) => {
                    let retries_used = attempt - 1;
                    if retries_used >= self.config.max_retries {
                        warn!(
                            "All {} retries exhausted: {}",
                            self.config.max_retries, error
                        );
                        return Err(error);
                    }
                    if !observer.should_retry(&error).await {
                        debug!("Not retrying after attempt {}: {}", attempt, error);
                        return Err(error);
                    }

                    observer.on_retry(attempt, &error).await;
                    warn!(
                        "Attempt {} failed: {}. Retrying in {:?}",
                        attempt, error, delay
                    );

                    sleep(delay).await;
                    delay = self.calculate_next_delay(delay);
                }
            }
        }
    }

    fn calculate_next_delay(&self, current_delay: Duration) -> Duration {
        let mut next_delay =
            Duration::from_secs_f64(current_delay.as_secs_f64() * self.config.exponential_base);

        if self.config.jitter {
            let jitter_amount = next_delay.as_secs_f64() * 0.1 * rand::random::<f64>();
            next_delay = Duration::from_secs_f64(next_delay.as_secs_f64() + jitter_amount);
        }

        if next_delay > self.config.max_delay() {
            next_delay = self.config.max_delay();
        }

        next_delay
    }
}
