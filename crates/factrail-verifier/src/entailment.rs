//! Three-way textual entailment between a claim and one chunk
//!
//! The judgment call is delegated; the verdict aggregation policy stays in
//! the verifier. Judges must honor the contract: `Entailed` only when the
//! chunk supports the claim, `Contradicted` only when it conflicts, and
//! `NotEnough` otherwise.

use async_trait::async_trait;
use factrail_llm::{invoke_structured, LlmError, PromptSpec, ReasoningCall, RetryPolicy};
use factrail_model::chunk::keyword_terms;
use factrail_model::Chunk;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Relation of one chunk to one claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Entailment {
    Entailed,
    Contradicted,
    NotEnough,
}

/// One judge's answer for one (claim, chunk) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgment {
    pub entailment: Entailment,
    pub note: String,
}

/// The pluggable judgment function. Implementations may be LLM-backed,
/// heuristic, or scripted; the output contract is the same three-way call.
#[async_trait]
pub trait EntailmentJudge: Send + Sync {
    async fn judge(&self, claim_text: &str, chunk: &Chunk) -> Result<Judgment, LlmError>;
}

// ============================================================================
// LLM-backed judge
// ============================================================================

const JUDGE_SYSTEM_PROMPT: &str = "You judge whether a source passage supports a claim. \
Answer with JSON: {\"relation\": \"ENTAILED\" | \"CONTRADICTED\" | \"NOT_ENOUGH\", \
\"rationale\": \"one sentence\"}. ENTAILED only if the passage states or directly \
implies the claim. CONTRADICTED only if the passage conflicts with it. \
Otherwise NOT_ENOUGH.";

#[derive(Debug, Deserialize)]
struct JudgeResponse {
    relation: Entailment,
    rationale: String,
}

/// Production judge: one reasoning call per (claim, chunk) pair
pub struct LlmJudge {
    call: Arc<dyn ReasoningCall>,
    policy: RetryPolicy,
}

impl LlmJudge {
    pub fn new(call: Arc<dyn ReasoningCall>, policy: RetryPolicy) -> Self {
        Self { call, policy }
    }
}

#[async_trait]
impl EntailmentJudge for LlmJudge {
    async fn judge(&self, claim_text: &str, chunk: &Chunk) -> Result<Judgment, LlmError> {
        let prompt = PromptSpec::new(format!(
            "Claim: {claim_text}\n\nSource passage [{}]:\n{}",
            chunk.id, chunk.text
        ))
        .with_system(JUDGE_SYSTEM_PROMPT)
        .with_temperature(0.0);

        let response: JudgeResponse =
            invoke_structured(self.call.as_ref(), &prompt, &self.policy).await?;
        Ok(Judgment {
            entailment: response.relation,
            note: response.rationale,
        })
    }
}

// ============================================================================
// Lexical judge
// ============================================================================

/// Deterministic judge for tests and offline runs.
///
/// Contradiction: the claim and chunk quote different numbers for the same
/// unit. Entailment: enough of the claim's content words appear in the
/// chunk. Everything else is NOT_ENOUGH — this judge prefers abstaining to
/// guessing.
pub struct LexicalJudge {
    overlap_threshold: f32,
    spec_re: Regex,
}

impl LexicalJudge {
    pub fn new() -> Self {
        Self {
            overlap_threshold: 0.6,
            spec_re: Regex::new(
                r"(?i)(-?\d+(?:\.\d+)?)\s*(°\s*[cf]|%|psi|bar|mpa|kpa|v|va|ma|mv|w|kw|hz|khz|mhz|mm|cm|m\b|kg|g\b|rpm|db)",
            )
            .unwrap(),
        }
    }

    pub fn with_threshold(mut self, t: f32) -> Self {
        self.overlap_threshold = t;
        self
    }

    fn numeric_specs(&self, text: &str) -> HashMap<String, Vec<String>> {
        let mut by_unit: HashMap<String, Vec<String>> = HashMap::new();
        for cap in self.spec_re.captures_iter(text) {
            let unit = cap[2].to_lowercase().replace(' ', "");
            by_unit.entry(unit).or_default().push(cap[1].to_string());
        }
        by_unit
    }
}

impl Default for LexicalJudge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntailmentJudge for LexicalJudge {
    async fn judge(&self, claim_text: &str, chunk: &Chunk) -> Result<Judgment, LlmError> {
        let claim_specs = self.numeric_specs(claim_text);
        let chunk_specs = self.numeric_specs(&chunk.text);
        for (unit, claim_values) in &claim_specs {
            if let Some(chunk_values) = chunk_specs.get(unit) {
                let conflicting = claim_values.iter().any(|v| !chunk_values.contains(v));
                if conflicting {
                    return Ok(Judgment {
                        entailment: Entailment::Contradicted,
                        note: format!(
                            "chunk quotes {} {unit}, claim says {} {unit}",
                            chunk_values.join("/"),
                            claim_values.join("/")
                        ),
                    });
                }
            }
        }

        let claim_terms = keyword_terms(claim_text);
        if claim_terms.is_empty() {
            return Ok(Judgment {
                entailment: Entailment::NotEnough,
                note: "claim has no content words".to_string(),
            });
        }
        let chunk_terms: std::collections::HashSet<_> =
            keyword_terms(&chunk.text).into_iter().collect();
        let hits = claim_terms.iter().filter(|t| chunk_terms.contains(*t)).count();
        let overlap = hits as f32 / claim_terms.len() as f32;

        if overlap >= self.overlap_threshold {
            Ok(Judgment {
                entailment: Entailment::Entailed,
                note: format!("{hits}/{} claim terms found in chunk", claim_terms.len()),
            })
        } else {
            Ok(Judgment {
                entailment: Entailment::NotEnough,
                note: format!("only {hits}/{} claim terms found", claim_terms.len()),
            })
        }
    }
}

// ============================================================================
// Mock judge
// ============================================================================

/// Scripted judge keyed by chunk id, with a default for unscripted pairs
pub struct MockJudge {
    by_chunk: HashMap<String, Entailment>,
    default: Entailment,
}

impl MockJudge {
    pub fn new(default: Entailment) -> Self {
        Self {
            by_chunk: HashMap::new(),
            default,
        }
    }

    pub fn on_chunk(mut self, chunk_id: &str, entailment: Entailment) -> Self {
        self.by_chunk.insert(chunk_id.to_string(), entailment);
        self
    }
}

#[async_trait]
impl EntailmentJudge for MockJudge {
    async fn judge(&self, _claim_text: &str, chunk: &Chunk) -> Result<Judgment, LlmError> {
        let entailment = self.by_chunk.get(&chunk.id).copied().unwrap_or(self.default);
        Ok(Judgment {
            entailment,
            note: "scripted".to_string(),
        })
    }
}
