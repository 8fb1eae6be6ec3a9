//! Factrail Reasoning-Call Boundary
//!
//! Everything the pipeline needs from an LLM goes through one narrow
//! contract: [`ReasoningCall::invoke`] takes a prompt and returns a JSON
//! value or a typed error. The contract is at-least-once-fallible — callers
//! must expect transport failures and malformed responses, and the helpers
//! here encode the retry policy:
//!
//! - `Transport` / `RateLimited` / `Timeout`: retried with exponential
//!   backoff up to a bounded attempt budget
//! - `MalformedResponse`: retried once with a corrective re-prompt, then
//!   escalated — never silently retried unchanged
//!
//! Concrete providers live in [`providers`]; tests use the counting
//! [`providers::MockReasoner`].

pub mod providers;
pub mod retry;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use providers::{create_reasoner, MockReasoner};
pub use retry::{with_retry, RetryPolicy};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("response did not match the expected structure: {0}")]
    MalformedResponse(String),

    #[error("reasoning call timed out after {0:?}")]
    Timeout(Duration),
}

impl LlmError {
    /// Infrastructure errors worth retrying with backoff. Malformed
    /// responses are handled separately (corrective re-prompt).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Transport(_) | LlmError::RateLimited | LlmError::Timeout(_)
        )
    }
}

// ============================================================================
// Prompt Spec
// ============================================================================

/// Provider-independent request: what to ask, not how to wire it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSpec {
    pub system: Option<String>,
    pub user: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

impl PromptSpec {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            system: None,
            user: user.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }
}

// ============================================================================
// Reasoning Call Contract
// ============================================================================

/// The single seam between the pipeline and any LLM backend
#[async_trait]
pub trait ReasoningCall: Send + Sync {
    /// Issue one call and return the parsed JSON payload
    async fn invoke(&self, prompt: &PromptSpec) -> Result<serde_json::Value, LlmError>;
}

/// Invoke and deserialize into `T`, with the full retry policy applied.
///
/// Backoff-retries infrastructure errors per `policy`; on a structure
/// mismatch, re-prompts once with the validation error appended, then
/// escalates `MalformedResponse`.
pub async fn invoke_structured<T: DeserializeOwned>(
    call: &dyn ReasoningCall,
    prompt: &PromptSpec,
    policy: &RetryPolicy,
) -> Result<T, LlmError> {
    let raw = with_retry(policy, || call.invoke(prompt)).await?;

    match serde_json::from_value::<T>(raw.clone()) {
        Ok(parsed) => Ok(parsed),
        Err(first_err) => {
            tracing::warn!(error = %first_err, "reasoning response failed validation, re-prompting once");
            let corrective = PromptSpec {
                system: prompt.system.clone(),
                user: format!(
                    "{}\n\nYour previous response was rejected: {first_err}. \
                     Respond again with JSON matching the required structure exactly.",
                    prompt.user
                ),
                max_tokens: prompt.max_tokens,
                temperature: prompt.temperature,
            };
            let raw = with_retry(policy, || call.invoke(&corrective)).await?;
            serde_json::from_value::<T>(raw)
                .map_err(|e| LlmError::MalformedResponse(e.to_string()))
        }
    }
}
