//! Content generators: thin prompt/parse wrappers, one per content type
//!
//! Generators never return prose with facts buried in it. The model is
//! asked for a JSON array of claims — `{text, cited_chunk_ids,
//! is_factual}` — and the contract is enforced on the way out: a factual
//! statement with no citations is demoted to the draft's assumptions list
//! rather than asserted. Verification happens later, in the orchestrator;
//! generators only shape candidates.

use crate::error::PipelineError;
use factrail_llm::{invoke_structured, PromptSpec, ReasoningCall, RetryPolicy};
use factrail_model::{
    Audience, Chunk, ChunkStore, Claim, ContentType, Draft, FactSheet, Tone,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Context budget for retrieved chunk text in one generation prompt
const MAX_CONTEXT_CHARS: usize = 12_000;
const RETRIEVAL_LIMIT: usize = 12;

/// Enumerated generation knobs — not open-ended strings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationParams {
    pub tone: Tone,
    pub audience: Audience,
}

/// Retrieval queries per content type. Each section pulls the chunks its
/// drafts tend to cite.
fn section_queries(content_type: ContentType) -> &'static [&'static str] {
    match content_type {
        ContentType::Faq => &[
            "installation wiring mounting",
            "accuracy specifications precision",
            "environmental limits temperature humidity",
            "compatibility integration protocols",
            "maintenance calibration intervals",
            "troubleshooting error codes diagnostics",
        ],
        ContentType::LandingPage => &[
            "product overview and description",
            "key specifications accuracy range",
            "differentiators unique selling points",
            "applications use cases industries",
            "compliance certifications standards",
        ],
        ContentType::UseCase => &[
            "use cases applications industries",
            "process monitoring quality control",
            "target users buyer personas",
            "deployment examples field installations",
            "environmental conditions operating ranges",
        ],
        ContentType::Comparison => &[
            "product variants models configurations",
            "specifications comparison table",
            "selection criteria decision factors",
            "operating range limits",
            "compatibility interfaces",
        ],
    }
}

fn system_prompt(content_type: ContentType) -> String {
    let shape = match content_type {
        ContentType::Faq => "frequently asked questions with direct answers",
        ContentType::LandingPage => "landing-page copy blocks",
        ContentType::UseCase => "use-case page sections",
        ContentType::Comparison => "comparison bullet points",
    };
    format!(
        "You draft {shape} for a product, as a JSON array of claims: \
{{\"text\": string, \"cited_chunk_ids\": [ids from the source passages], \
\"is_factual\": bool}}. Every factual statement must cite the chunk ids that \
support it. Subjective or call-to-action copy gets is_factual=false and no \
citations. If a fact cannot be cited, do not state it."
    )
}

#[derive(Debug, Deserialize)]
struct RawClaim {
    text: String,
    #[serde(default)]
    cited_chunk_ids: Vec<String>,
    #[serde(default = "default_factual")]
    is_factual: bool,
}

fn default_factual() -> bool {
    true
}

/// One generator drives all content types; the type picks queries and
/// prompt shape
pub struct DraftGenerator {
    call: Arc<dyn ReasoningCall>,
    policy: RetryPolicy,
    params: GenerationParams,
}

impl DraftGenerator {
    pub fn new(call: Arc<dyn ReasoningCall>, policy: RetryPolicy, params: GenerationParams) -> Self {
        Self { call, policy, params }
    }

    pub async fn generate(
        &self,
        content_type: ContentType,
        doc_id: &str,
        sheet: &FactSheet,
        store: &dyn ChunkStore,
    ) -> Result<Draft, PipelineError> {
        let retrieved = store.retrieve(doc_id, section_queries(content_type), RETRIEVAL_LIMIT);
        let context = build_context(&retrieved, MAX_CONTEXT_CHARS);

        let prompt = PromptSpec::new(format!(
            "Tone: {:?}. Audience: {:?}.\n\nFact sheet:\n{}\n\nSource passages:\n{context}",
            self.params.tone,
            self.params.audience,
            sheet.summary(),
        ))
        .with_system(system_prompt(content_type))
        .with_temperature(0.3);

        let raw: Vec<RawClaim> =
            invoke_structured(self.call.as_ref(), &prompt, &self.policy).await?;

        let mut claims = Vec::new();
        let mut assumptions = Vec::new();
        for rc in raw {
            if rc.is_factual && rc.cited_chunk_ids.is_empty() {
                // Contract: uncited facts are assumptions, never assertions
                tracing::debug!(text = %rc.text, "uncited factual statement demoted to assumption");
                assumptions.push(rc.text);
                continue;
            }
            claims.push(Claim {
                id: Uuid::new_v4(),
                text: rc.text,
                cited_chunk_ids: rc.cited_chunk_ids,
                is_factual: rc.is_factual,
            });
        }

        tracing::info!(
            content_type = content_type.as_str(),
            claims = claims.len(),
            assumptions = assumptions.len(),
            "draft generated"
        );
        Ok(Draft {
            content_type,
            claims,
            assumptions,
        })
    }
}

fn build_context(chunks: &[Chunk], max_chars: usize) -> String {
    let mut parts = Vec::new();
    let mut total = 0;
    for chunk in chunks {
        let excerpt: String = chunk.text.chars().take(1500).collect();
        let snippet = format!("[{}] {excerpt}", chunk.id);
        if total + snippet.len() > max_chars {
            break;
        }
        total += snippet.len();
        parts.push(snippet);
    }
    parts.join("\n\n")
}
