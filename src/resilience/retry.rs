//! Retry Logic
//!
//! Bounded exponential backoff with jitter. The attempt budget and the
//! backoff state are plain values so callers and tests can inspect them.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::OAuth2Error;
use crate::resilience::Deadline;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Jitter factor (0.0-1.0).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        DEFAULT_RETRY_CONFIG
    }
}

/// Default retry configuration.
pub const DEFAULT_RETRY_CONFIG: RetryConfig = RetryConfig {
    max_attempts: 3,
    initial_delay: Duration::from_millis(500),
    max_delay: Duration::from_secs(8),
    multiplier: 2.0,
    jitter: 0.2,
};

/// Hard ceiling on attempts regardless of configuration.
pub const MAX_ATTEMPTS: u32 = 3;

/// Backoff state for one retried operation.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Effective attempt budget.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.clamp(1, MAX_ATTEMPTS)
    }

    /// Record the start of an attempt.
    pub fn start_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// Whether another attempt fits in the budget.
    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_attempts()
    }

    /// Delay before retry number `retry` (0-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let millis = self.config.initial_delay.as_millis() as f64
            * self.config.multiplier.powi(retry as i32);
        let capped = millis.min(self.config.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Jittered delay after the current attempt, honouring a server hint.
    pub fn next_delay(&self, retry_after: Option<Duration>) -> Duration {
        let base = self.base_delay(self.attempt.saturating_sub(1)).as_millis() as f64;
        let jitter_range = base * self.config.jitter.clamp(0.0, 1.0);
        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
        let delay = Duration::from_millis((base + jitter).max(0.0) as u64);

        match retry_after {
            Some(hint) => delay.max(hint).min(self.config.max_delay),
            None => delay,
        }
    }
}

/// Retry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryStats {
    pub total_attempts: u32,
    pub successful_retries: u32,
    pub failed_operations: u32,
}

/// Retry executor. One executor per invocation keeps the statistics scoped to it.
pub struct OAuth2RetryExecutor {
    config: RetryConfig,
    stats: Mutex<RetryStats>,
}

impl OAuth2RetryExecutor {
    /// Create new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(RetryStats::default()),
        }
    }

    /// Run `operation` until it succeeds, fails terminally, exhausts the
    /// attempt budget, or the next backoff would overrun `deadline`.
    pub async fn execute<T, F, Fut>(
        &self,
        operation_name: &'static str,
        deadline: &Deadline,
        mut operation: F,
    ) -> Result<T, OAuth2Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OAuth2Error>>,
    {
        let mut backoff = Backoff::new(self.config.clone());

        loop {
            let attempt = backoff.start_attempt();
            self.update_stats(|stats| stats.total_attempts += 1);

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        self.update_stats(|stats| stats.successful_retries += 1);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_retryable() || !backoff.can_retry() {
                if error.is_retryable() {
                    warn!(operation = operation_name, attempt, error = %error, "retry budget exhausted");
                }
                self.update_stats(|stats| stats.failed_operations += 1);
                return Err(error);
            }

            let delay = backoff.next_delay(error.retry_after());
            if !deadline.has_at_least(delay) {
                warn!(operation = operation_name, attempt, ?delay, "invocation budget too small to retry");
                self.update_stats(|stats| stats.failed_operations += 1);
                return Err(error);
            }

            debug!(operation = operation_name, attempt, ?delay, error = %error, "retrying after transient failure");
            tokio::time::sleep(delay).await;
        }
    }

    /// Get retry statistics.
    pub fn get_stats(&self) -> RetryStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn update_stats(&self, f: impl FnOnce(&mut RetryStats)) {
        f(&mut self.stats.lock().unwrap_or_else(|e| e.into_inner()));
    }
}

impl Default for OAuth2RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
