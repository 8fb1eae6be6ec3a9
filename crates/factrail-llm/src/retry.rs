//! Bounded retry with exponential backoff for reasoning calls

use crate::LlmError;
use std::future::Future;
use std::time::Duration;

const BASE_BACKOFF_MS: u64 = 500;

/// Attempt budget and backoff base for one logical call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff. Used in tests and by callers that
    /// layer their own retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
        }
    }

    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.base_backoff * (1u32 << attempt.min(16))
    }
}

/// Run `f`, retrying retryable [`LlmError`]s up to the policy's attempt
/// budget with exponential backoff. Non-retryable errors surface
/// immediately.
pub async fn with_retry<F, Fut>(policy: &RetryPolicy, mut f: F) -> Result<serde_json::Value, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<serde_json::Value, LlmError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.backoff_for(attempt);
                tracing::warn!(
                    %err,
                    attempt = attempt + 1,
                    max = policy.max_attempts,
                    "retryable reasoning-call failure, backing off {delay:?}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
