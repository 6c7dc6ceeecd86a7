//! Retry with exponential backoff, jitter and a persistent rate-limit hook.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::StewardError;

/// Invoked after repeated 429s with the error message. Returning a model ID
/// means the caller switched models and the retry budget starts over.
pub type PersistentRateLimitHandler =
    Arc<dyn Fn(String) -> BoxFuture<'static, Option<String>> + Send + Sync>;

/// Consecutive 429s before the persistent rate-limit handler is consulted.
const PERSISTENT_RATE_LIMIT_THRESHOLD: u32 = 2;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(5_000),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Execute an async operation with retry.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, StewardError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StewardError>>,
    {
        self.execute_with_fallback(operation, None).await
    }

    /// Execute an async operation with retry, consulting `on_persistent_429`
    /// once rate limiting repeats.
    pub async fn execute_with_fallback<F, Fut, T>(
        &self,
        mut operation: F,
        on_persistent_429: Option<&PersistentRateLimitHandler>,
    ) -> Result<T, StewardError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StewardError>>,
    {
        let mut attempt = 0u32;
        let mut backoff = self.initial_backoff;
        let mut consecutive_rate_limits = 0u32;

        loop {
            attempt += 1;
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if error.is_rate_limit() {
                consecutive_rate_limits += 1;
            } else {
                consecutive_rate_limits = 0;
            }

            if consecutive_rate_limits >= PERSISTENT_RATE_LIMIT_THRESHOLD {
                if let Some(handler) = on_persistent_429 {
                    if let Some(model) = handler(error.to_string()).await {
                        tracing::info!(model = %model, "Switched model after persistent rate limiting");
                        attempt = 0;
                        consecutive_rate_limits = 0;
                        backoff = self.initial_backoff;
                        continue;
                    }
                }
            }

            if !error.is_retryable() || attempt >= self.max_attempts {
                return Err(error);
            }

            if let StewardError::RateLimited {
                retry_after_ms: Some(retry_after_ms),
            } = &error
            {
                tracing::warn!(
                    attempt,
                    max_attempts = self.max_attempts,
                    retry_after_ms,
                    "Rate limited, honouring server retry delay"
                );
                tokio::time::sleep(Duration::from_millis(*retry_after_ms)).await;
                backoff = self.initial_backoff;
                continue;
            }

            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                error = %error,
                "Retrying after error"
            );

            // Jitter between 0.7x and 1.3x of the backoff
            let jitter_factor = 0.7 + (rand_factor() * 0.6);
            let sleep_duration =
                Duration::from_secs_f64(backoff.as_secs_f64() * jitter_factor);
            tokio::time::sleep(sleep_duration).await;

            backoff = Duration::from_secs_f64(
                (backoff.as_secs_f64() * self.multiplier).min(self.max_backoff.as_secs_f64()),
            );
        }
    }
}

/// Pseudo-random factor in [0, 1) seeded from the clock and thread id.
fn rand_factor() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);

    let hash = hasher.finish();
    (hash % 10000) as f64 / 10000.0
}
