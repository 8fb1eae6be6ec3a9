//! Claim verification: resolve citations, judge entailment, aggregate
//!
//! Policy, in order:
//! 1. non-factual claims are exempt (SUPPORTED, short-circuit)
//! 2. a factual claim with no citations is UNSUPPORTED — hard invariant
//! 3. a citation the store cannot resolve is UNSUPPORTED — dangling ids
//!    outrank text content
//! 4. each resolved chunk gets a three-way entailment judgment
//! 5. one contradiction makes the whole claim UNSUPPORTED, however many
//!    other chunks support it; otherwise one entailment suffices for
//!    SUPPORTED; otherwise AMBIGUOUS
//!
//! The claim text is never touched here. Rejection triggers regeneration
//! or omission upstream.

use crate::entailment::{Entailment, EntailmentJudge, Judgment};
use factrail_llm::LlmError;
use factrail_model::{Chunk, ChunkStore, Claim, VerificationResult, Verdict};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    /// Infrastructure failure (chunk store or reasoning transport); the
    /// orchestrator retries these. Verdicts on bad claims are not errors.
    #[error("reasoning call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("verification task panicked: {0}")]
    Join(String),
}

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Parallel entailment judgments across claims, bounded to respect
    /// reasoning-call rate limits
    pub concurrency: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

/// Aggregate per-chunk judgments into one claim verdict. Pure; the
/// dominance ordering (contradiction > entailment > abstention) is the
/// whole policy.
pub fn aggregate_verdict(judgments: &[(Chunk, Judgment)]) -> (Verdict, Vec<String>, String) {
    let contradiction = judgments
        .iter()
        .find(|(_, j)| j.entailment == Entailment::Contradicted);
    if let Some((chunk, judgment)) = contradiction {
        return (
            Verdict::Unsupported,
            Vec::new(),
            format!("contradicted by {}: {}", chunk.id, judgment.note),
        );
    }

    let matched: Vec<String> = judgments
        .iter()
        .filter(|(_, j)| j.entailment == Entailment::Entailed)
        .map(|(c, _)| c.id.clone())
        .collect();
    if !matched.is_empty() {
        return (
            Verdict::Supported,
            matched.clone(),
            format!("entailed by {}", matched.join(", ")),
        );
    }

    (
        Verdict::Ambiguous,
        Vec::new(),
        "no cited chunk entails or contradicts the claim".to_string(),
    )
}

/// The grounding verifier: one store, one judge, one policy
pub struct GroundingVerifier {
    store: Arc<dyn ChunkStore>,
    judge: Arc<dyn EntailmentJudge>,
    config: VerifierConfig,
}

impl GroundingVerifier {
    pub fn new(store: Arc<dyn ChunkStore>, judge: Arc<dyn EntailmentJudge>) -> Self {
        Self {
            store,
            judge,
            config: VerifierConfig::default(),
        }
    }

    pub fn with_config(mut self, config: VerifierConfig) -> Self {
        self.config = config;
        self
    }

    /// Verify one claim against its own citations
    pub async fn verify_claim(&self, claim: &Claim) -> Result<VerificationResult, VerifierError> {
        verify_one(self.store.as_ref(), self.judge.as_ref(), claim).await
    }

    /// Verify a batch of claims concurrently, bounded by the configured
    /// limit. Results come back in claim order.
    pub async fn verify_all(
        &self,
        claims: &[Claim],
    ) -> Result<Vec<VerificationResult>, VerifierError> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut set = JoinSet::new();

        for (idx, claim) in claims.iter().cloned().enumerate() {
            let store = Arc::clone(&self.store);
            let judge = Arc::clone(&self.judge);
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                (idx, verify_one(store.as_ref(), judge.as_ref(), &claim).await)
            });
        }

        let mut results: Vec<Option<VerificationResult>> = vec![None; claims.len()];
        while let Some(joined) = set.join_next().await {
            let (idx, result) = joined.map_err(|e| VerifierError::Join(e.to_string()))?;
            results[idx] = Some(result?);
        }
        Ok(results
            .into_iter()
            .map(|r| r.expect("all indices filled"))
            .collect())
    }
}

async fn verify_one(
    store: &dyn ChunkStore,
    judge: &dyn EntailmentJudge,
    claim: &Claim,
) -> Result<VerificationResult, VerifierError> {
    if !claim.is_factual {
        return Ok(VerificationResult::new(
            claim.id,
            Verdict::Supported,
            Vec::new(),
            "non-factual claim, exempt from grounding",
        ));
    }

    if claim.cited_chunk_ids.is_empty() {
        return Ok(VerificationResult::new(
            claim.id,
            Verdict::Unsupported,
            Vec::new(),
            "factual claim cites no chunks",
        ));
    }

    let mut resolved = Vec::with_capacity(claim.cited_chunk_ids.len());
    for id in &claim.cited_chunk_ids {
        match store.get(id) {
            Some(chunk) => resolved.push(chunk),
            None => {
                return Ok(VerificationResult::new(
                    claim.id,
                    Verdict::Unsupported,
                    Vec::new(),
                    &format!("dangling citation: chunk {id} not in store"),
                ));
            }
        }
    }

    let mut judgments = Vec::with_capacity(resolved.len());
    for chunk in resolved {
        let judgment = judge.judge(&claim.text, &chunk).await?;
        judgments.push((chunk, judgment));
    }

    let (verdict, matched, rationale) = aggregate_verdict(&judgments);
    tracing::debug!(claim = %claim.id, ?verdict, "claim verified");
    Ok(VerificationResult::new(claim.id, verdict, matched, &rationale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entailment::MockJudge;
    use factrail_model::{InMemoryChunkStore, SourceLocator};

    fn store_with(texts: &[(&str, &str)]) -> Arc<InMemoryChunkStore> {
        let store = InMemoryChunkStore::new();
        for (id, text) in texts {
            store
                .insert(Chunk::new(
                    *id,
                    "doc-1",
                    text,
                    SourceLocator::Pdf { page: 1, offset: 0 },
                ))
                .unwrap();
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn non_factual_claims_short_circuit() {
        let store = store_with(&[]);
        let judge = Arc::new(MockJudge::new(Entailment::Contradicted));
        let verifier = GroundingVerifier::new(store, judge);

        let result = verifier
            .verify_claim(&Claim::marketing("Best in class!"))
            .await
            .unwrap();
        assert_eq!(result.verdict, Verdict::Supported);
    }

    #[tokio::test]
    async fn factual_claim_without_citations_is_unsupported() {
        let store = store_with(&[("pdf-p1-c0", "some text")]);
        let judge = Arc::new(MockJudge::new(Entailment::Entailed));
        let verifier = GroundingVerifier::new(store, judge);

        let result = verifier
            .verify_claim(&Claim::factual("The range is 0-100", vec![]))
            .await
            .unwrap();
        assert_eq!(result.verdict, Verdict::Unsupported);
    }

    #[tokio::test]
    async fn dangling_citation_is_unsupported_regardless_of_judge() {
        let store = store_with(&[("pdf-p1-c0", "some text")]);
        let judge = Arc::new(MockJudge::new(Entailment::Entailed));
        let verifier = GroundingVerifier::new(store, judge);

        let result = verifier
            .verify_claim(&Claim::factual("anything", vec!["missing-id".into()]))
            .await
            .unwrap();
        assert_eq!(result.verdict, Verdict::Unsupported);
        assert!(result.rationale.contains("dangling"));
    }

    #[tokio::test]
    async fn contradiction_outranks_support() {
        let store = store_with(&[("c-support", "supports"), ("c-contra", "contradicts")]);
        let judge = Arc::new(
            MockJudge::new(Entailment::NotEnough)
                .on_chunk("c-support", Entailment::Entailed)
                .on_chunk("c-contra", Entailment::Contradicted),
        );
        let verifier = GroundingVerifier::new(store, judge);

        let result = verifier
            .verify_claim(&Claim::factual(
                "claim text",
                vec!["c-support".into(), "c-contra".into()],
            ))
            .await
            .unwrap();
        assert_eq!(result.verdict, Verdict::Unsupported);
        assert!(result.matched_chunk_ids.is_empty());
    }

    #[tokio::test]
    async fn all_abstentions_yield_ambiguous() {
        let store = store_with(&[("c-1", "unrelated"), ("c-2", "also unrelated")]);
        let judge = Arc::new(MockJudge::new(Entailment::NotEnough));
        let verifier = GroundingVerifier::new(store, judge);

        let result = verifier
            .verify_claim(&Claim::factual("claim", vec!["c-1".into(), "c-2".into()]))
            .await
            .unwrap();
        assert_eq!(result.verdict, Verdict::Ambiguous);
    }

    #[tokio::test]
    async fn batch_preserves_claim_order() {
        let store = store_with(&[("c-1", "text")]);
        let judge = Arc::new(MockJudge::new(Entailment::Entailed));
        let verifier = GroundingVerifier::new(store, judge)
            .with_config(VerifierConfig { concurrency: 2 });

        let claims = vec![
            Claim::factual("first", vec!["c-1".into()]),
            Claim::marketing("second"),
            Claim::factual("third", vec![]),
        ];
        let results = verifier.verify_all(&claims).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].claim_id, claims[0].id);
        assert_eq!(results[1].claim_id, claims[1].id);
        assert_eq!(results[2].verdict, Verdict::Unsupported);
    }

    mod aggregation_properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_entailment() -> impl Strategy<Value = Entailment> {
            prop_oneof![
                Just(Entailment::Entailed),
                Just(Entailment::Contradicted),
                Just(Entailment::NotEnough),
            ]
        }

        fn chunk_with_id(n: usize) -> Chunk {
            Chunk::new(
                format!("c-{n}"),
                "doc-1",
                "text",
                SourceLocator::Pdf { page: 1, offset: 0 },
            )
        }

        proptest! {
            #[test]
            fn dominance_ordering_holds(entailments in proptest::collection::vec(arb_entailment(), 1..8)) {
                let judgments: Vec<(Chunk, Judgment)> = entailments
                    .iter()
                    .enumerate()
                    .map(|(i, e)| {
                        (chunk_with_id(i), Judgment { entailment: *e, note: String::new() })
                    })
                    .collect();

                let (verdict, matched, _) = aggregate_verdict(&judgments);
                let any_contra = entailments.contains(&Entailment::Contradicted);
                let any_entail = entailments.contains(&Entailment::Entailed);

                if any_contra {
                    prop_assert_eq!(verdict, Verdict::Unsupported);
                    prop_assert!(matched.is_empty());
                } else if any_entail {
                    prop_assert_eq!(verdict, Verdict::Supported);
                    prop_assert!(!matched.is_empty());
                } else {
                    prop_assert_eq!(verdict, Verdict::Ambiguous);
                }
            }
        }
    }
}
