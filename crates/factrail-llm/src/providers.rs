//! Reasoning-call providers (OpenAI, Anthropic) and the test mock
//!
//! Providers are feature-gated so the core pipeline builds without an HTTP
//! stack. All of them normalize model output to a JSON value: responses
//! wrapped in Markdown code fences are unwrapped before parsing.

use crate::{LlmError, PromptSpec, ReasoningCall};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Strip a Markdown code fence (``` or ```json) from raw model output
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse provider text output into JSON, treating failures as malformed
/// responses (retryable once with a corrective re-prompt upstream)
pub fn parse_json_payload(raw: &str) -> Result<serde_json::Value, LlmError> {
    serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| LlmError::MalformedResponse(format!("{e}: {}", truncate(raw, 120))))
}

fn truncate(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        s.to_string()
    } else {
        let mut end = limit;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

// ============================================================================
// OpenAI
// ============================================================================

#[cfg(feature = "openai")]
pub struct OpenAiReasoner {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

#[cfg(feature = "openai")]
impl OpenAiReasoner {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[cfg(feature = "openai")]
#[async_trait]
impl ReasoningCall for OpenAiReasoner {
    async fn invoke(&self, prompt: &PromptSpec) -> Result<serde_json::Value, LlmError> {
        let mut messages = Vec::new();
        if let Some(system) = &prompt.system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt.user}));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": prompt.max_tokens,
            "temperature": prompt.temperature,
            "response_format": {"type": "json_object"},
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(LlmError::Transport(format!("openai status {}", response.status())));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::MalformedResponse("missing choices[0].message.content".into()))?;
        parse_json_payload(content)
    }
}

// ============================================================================
// Anthropic
// ============================================================================

#[cfg(feature = "anthropic")]
pub struct AnthropicReasoner {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

#[cfg(feature = "anthropic")]
impl AnthropicReasoner {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[cfg(feature = "anthropic")]
#[async_trait]
impl ReasoningCall for AnthropicReasoner {
    async fn invoke(&self, prompt: &PromptSpec) -> Result<serde_json::Value, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": prompt.max_tokens.unwrap_or(4096),
            "system": prompt.system,
            "messages": [{"role": "user", "content": prompt.user}],
            "temperature": prompt.temperature,
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(LlmError::Transport(format!("anthropic status {}", response.status())));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        let content = payload["content"][0]["text"]
            .as_str()
            .ok_or_else(|| LlmError::MalformedResponse("missing content[0].text".into()))?;
        parse_json_payload(content)
    }
}

// ============================================================================
// Mock
// ============================================================================

/// Scripted reasoner for tests. Counts every invocation so tests can
/// assert which stages actually re-ran (idempotent resume relies on this).
pub struct MockReasoner {
    outcomes: Mutex<VecDeque<Result<serde_json::Value, LlmError>>>,
    fallback: Option<serde_json::Value>,
    prompts: Mutex<Vec<PromptSpec>>,
    calls: AtomicUsize,
}

impl MockReasoner {
    /// Queue of successful JSON responses, consumed in order
    pub fn with_responses(responses: Vec<serde_json::Value>) -> Self {
        Self {
            outcomes: Mutex::new(responses.into_iter().map(Ok).collect()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue of explicit outcomes, including injected failures
    pub fn with_outcomes(outcomes: Vec<Result<serde_json::Value, LlmError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Return the same response for every call
    pub fn always(response: serde_json::Value) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            fallback: Some(response),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts seen so far, for asserting on prompt content
    pub fn prompts(&self) -> Vec<PromptSpec> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningCall for MockReasoner {
    async fn invoke(&self, prompt: &PromptSpec) -> Result<serde_json::Value, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());

        if let Some(outcome) = self.outcomes.lock().unwrap().pop_front() {
            return outcome;
        }
        match &self.fallback {
            Some(value) => Ok(value.clone()),
            None => Err(LlmError::Transport("mock reasoner: no responses left".into())),
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Select a reasoner from configuration, mirroring how deployments pick a
/// provider by name
pub fn create_reasoner(
    provider_type: &str,
    config: &HashMap<String, String>,
) -> Result<Box<dyn ReasoningCall>, LlmError> {
    match provider_type {
        #[cfg(feature = "openai")]
        "openai" => {
            let api_key = config
                .get("api_key")
                .ok_or_else(|| LlmError::Transport("openai requires api_key".into()))?;
            let model = config.get("model").map(|s| s.as_str()).unwrap_or("gpt-4o");
            Ok(Box::new(OpenAiReasoner::new(api_key, model)))
        }
        #[cfg(feature = "anthropic")]
        "anthropic" => {
            let api_key = config
                .get("api_key")
                .ok_or_else(|| LlmError::Transport("anthropic requires api_key".into()))?;
            let model = config
                .get("model")
                .map(|s| s.as_str())
                .unwrap_or("claude-sonnet-4-20250514");
            Ok(Box::new(AnthropicReasoner::new(api_key, model)))
        }
        "mock" => {
            let response = config
                .get("response")
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(serde_json::json!({}));
            Ok(Box::new(MockReasoner::always(response)))
        }
        other => Err(LlmError::Transport(format!("unknown provider: {other}"))),
    }
}
