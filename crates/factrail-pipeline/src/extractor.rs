//! Fact-sheet extraction: one reasoning call, strict validation
//!
//! The model is prompted with every chunk and must answer with a JSON
//! object mapping schema field names to `{value, provenance, confidence}`.
//! Validation is enforced here, not trusted to the prompt:
//!
//! - unknown field names are dropped
//! - provenance ids not in the input chunk set are stripped (the extractor
//!   must never fabricate a citation)
//! - a populated field left with zero provenance is nulled, not guessed
//!
//! All-or-nothing: if the call fails or the structure is unparsable after
//! the corrective re-prompt, no fact sheet is written.

use crate::error::PipelineError;
use factrail_llm::{invoke_structured, LlmError, PromptSpec, ReasoningCall, RetryPolicy};
use factrail_model::{Chunk, Confidence, FactField, FactSheet, FactValue};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const EXTRACT_SYSTEM_PROMPT: &str = "You extract a product fact sheet from source passages. \
Answer with one JSON object whose keys are schema field names and whose values are \
{\"value\": <string or array>, \"provenance\": [<chunk ids>], \"confidence\": \"HIGH\"|\"MEDIUM\"|\"LOW\"}. \
Only cite chunk ids that appear in the input. Omit any field the passages do not support — \
never guess.";

/// Per-chunk text budget in the prompt, to keep context bounded
const CHUNK_EXCERPT_CHARS: usize = 1500;

#[derive(Debug, Deserialize)]
struct RawFact {
    value: serde_json::Value,
    #[serde(default)]
    provenance: Vec<String>,
    #[serde(default = "default_confidence")]
    confidence: Confidence,
}

fn default_confidence() -> Confidence {
    Confidence::Low
}

/// Thin prompt/parse wrapper around the reasoning call
pub struct FactSheetExtractor {
    call: Arc<dyn ReasoningCall>,
    policy: RetryPolicy,
}

impl FactSheetExtractor {
    pub fn new(call: Arc<dyn ReasoningCall>, policy: RetryPolicy) -> Self {
        Self { call, policy }
    }

    /// Extract a fact sheet from the ordered chunks of one document
    pub async fn extract(&self, chunks: &[Chunk]) -> Result<FactSheet, PipelineError> {
        let known_ids: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();

        let mut context = String::new();
        for chunk in chunks {
            let excerpt: String = chunk.text.chars().take(CHUNK_EXCERPT_CHARS).collect();
            context.push_str(&format!("[{}] {}\n\n", chunk.id, excerpt));
        }

        let prompt = PromptSpec::new(format!(
            "Schema fields: {}.\n\nSource passages:\n{context}",
            FactField::ALL
                .iter()
                .map(|f| f.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .with_system(EXTRACT_SYSTEM_PROMPT)
        .with_temperature(0.0);

        let raw: HashMap<String, RawFact> =
            invoke_structured(self.call.as_ref(), &prompt, &self.policy)
                .await
                .map_err(|e| match e {
                    LlmError::MalformedResponse(detail) => PipelineError::Extraction(detail),
                    other => PipelineError::Llm(other),
                })?;

        let mut sheet = FactSheet::new();
        for (name, fact) in raw {
            let Some(field) = FactField::parse(&name) else {
                tracing::warn!(field = %name, "extractor returned unknown field, dropping");
                continue;
            };
            if fact.value.is_null() {
                continue;
            }

            let provenance: Vec<String> = fact
                .provenance
                .into_iter()
                .filter(|id| {
                    let known = known_ids.contains(id.as_str());
                    if !known {
                        tracing::warn!(%field, chunk_id = %id, "fabricated provenance id stripped");
                    }
                    known
                })
                .collect();

            if provenance.is_empty() {
                tracing::warn!(%field, "field had no valid provenance, leaving null");
                continue;
            }

            let value = FactValue {
                value: fact.value,
                provenance,
                confidence: fact.confidence,
            };
            sheet
                .insert(field, value)
                .expect("provenance checked non-empty above");
        }

        tracing::info!(
            fields = sheet.populated_count(),
            chunks = chunks.len(),
            "fact sheet extracted"
        );
        Ok(sheet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factrail_llm::MockReasoner;
    use factrail_model::SourceLocator;
    use serde_json::json;

    fn chunks() -> Vec<Chunk> {
        vec![
            Chunk::new(
                "pdf-p1-c0",
                "doc-1",
                "FlowSense 200 ultrasonic flow meter",
                SourceLocator::Pdf { page: 1, offset: 0 },
            ),
            Chunk::new(
                "pdf-p2-c0",
                "doc-1",
                "Accuracy ±0.5% of full scale",
                SourceLocator::Pdf { page: 2, offset: 0 },
            ),
        ]
    }

    #[tokio::test]
    async fn populated_fields_keep_their_provenance() {
        let mock = Arc::new(MockReasoner::with_responses(vec![json!({
            "product_name": {"value": "FlowSense 200", "provenance": ["pdf-p1-c0"], "confidence": "HIGH"},
            "accuracy": {"value": "±0.5% FS", "provenance": ["pdf-p2-c0"], "confidence": "HIGH"},
        })]));
        let extractor = FactSheetExtractor::new(mock, RetryPolicy::none());

        let sheet = extractor.extract(&chunks()).await.unwrap();
        assert_eq!(sheet.populated_count(), 2);
        let accuracy = sheet.get(FactField::Accuracy).unwrap();
        assert_eq!(accuracy.provenance, vec!["pdf-p2-c0".to_string()]);
    }

    #[tokio::test]
    async fn fabricated_provenance_nulls_the_field() {
        let mock = Arc::new(MockReasoner::with_responses(vec![json!({
            "product_name": {"value": "FlowSense 200", "provenance": ["pdf-p9-c9"], "confidence": "HIGH"},
        })]));
        let extractor = FactSheetExtractor::new(mock, RetryPolicy::none());

        let sheet = extractor.extract(&chunks()).await.unwrap();
        assert!(!sheet.is_populated(FactField::ProductName));
    }

    #[tokio::test]
    async fn unknown_fields_are_dropped() {
        let mock = Arc::new(MockReasoner::with_responses(vec![json!({
            "warranty_years": {"value": "3", "provenance": ["pdf-p1-c0"], "confidence": "LOW"},
            "product_name": {"value": "FlowSense 200", "provenance": ["pdf-p1-c0"], "confidence": "HIGH"},
        })]));
        let extractor = FactSheetExtractor::new(mock, RetryPolicy::none());

        let sheet = extractor.extract(&chunks()).await.unwrap();
        assert_eq!(sheet.populated_count(), 1);
    }

    #[tokio::test]
    async fn unparsable_structure_fails_extraction_without_a_sheet() {
        // Both the original response and the corrective re-prompt come back
        // in the wrong shape
        let mock = Arc::new(MockReasoner::with_responses(vec![
            json!(["not", "an", "object"]),
            json!("still wrong"),
        ]));
        let extractor = FactSheetExtractor::new(mock, RetryPolicy::none());

        let result = extractor.extract(&chunks()).await;
        assert!(matches!(result, Err(PipelineError::Extraction(_))));
    }
}
