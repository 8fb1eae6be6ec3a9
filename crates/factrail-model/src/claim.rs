//! Claims and verification results
//!
//! A claim is one generated statement plus its chunk citations. Claims are
//! immutable once verified; a rejected claim is discarded or regenerated
//! upstream, never edited in place.

use crate::{ChunkId, ClaimId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A generated statement with its supporting citations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub text: String,
    pub cited_chunk_ids: Vec<ChunkId>,
    /// false = marketing/subjective copy, exempt from grounding
    pub is_factual: bool,
}

impl Claim {
    pub fn factual(text: &str, cited_chunk_ids: Vec<ChunkId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.to_string(),
            cited_chunk_ids,
            is_factual: true,
        }
    }

    /// Subjective or call-to-action copy; not checked by the verifier
    pub fn marketing(text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.to_string(),
            cited_chunk_ids: Vec::new(),
            is_factual: false,
        }
    }
}

/// Three-way grounding verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Supported,
    Unsupported,
    Ambiguous,
}

/// One verification pass over one claim. Append-only audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub claim_id: ClaimId,
    pub verdict: Verdict,
    /// Cited chunks that entailed the claim
    pub matched_chunk_ids: Vec<ChunkId>,
    pub rationale: String,
    pub checked_at: DateTime<Utc>,
}

impl VerificationResult {
    pub fn new(claim_id: ClaimId, verdict: Verdict, matched: Vec<ChunkId>, rationale: &str) -> Self {
        Self {
            claim_id,
            verdict,
            matched_chunk_ids: matched,
            rationale: rationale.to_string(),
            checked_at: Utc::now(),
        }
    }
}
