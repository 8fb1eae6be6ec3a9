//! Audit stage: deterministic checks, generated recommendations, critic
//!
//! Three passes over the extracted facts:
//! 1. deterministic checks — contradictory spec values and numeric specs
//!    missing units, flagged straight off the fact sheet
//! 2. generated recommendations — one reasoning call proposing
//!    improvements; these are born ungrounded (`is_grounded = false`)
//! 3. critic pass — every ungrounded recommendation is checked against the
//!    source chunks; unsupported ones are kept in the report but flagged,
//!    and never become claims
//!
//! Grounded findings are routed through the grounding verifier as claims;
//! a finding whose claim comes back UNSUPPORTED is discarded, not edited.

use crate::error::PipelineError;
use factrail_llm::{invoke_structured, PromptSpec, ReasoningCall, RetryPolicy};
use factrail_model::{
    AuditFinding, AuditReport, Chunk, Claim, FactField, FactSheet, FindingCategory,
    FindingSeverity, Verdict,
};
use factrail_verifier::GroundingVerifier;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

const RECOMMEND_SYSTEM_PROMPT: &str = "You audit product documentation for content gaps. \
Given a fact sheet, propose up to five improvements as a JSON array of \
{\"title\": string, \"description\": string, \"recommendation\": string}. Do not restate facts.";

const CRITIC_SYSTEM_PROMPT: &str = "You check whether a recommendation is justified by source \
passages. Answer with JSON {\"supported\": bool, \"note\": \"one sentence\"}.";

#[derive(Debug, Deserialize)]
struct RawRecommendation {
    title: String,
    description: String,
    recommendation: String,
}

#[derive(Debug, Deserialize)]
struct CriticAnswer {
    supported: bool,
    note: String,
}

pub struct AuditStage {
    call: Arc<dyn ReasoningCall>,
    policy: RetryPolicy,
}

impl AuditStage {
    pub fn new(call: Arc<dyn ReasoningCall>, policy: RetryPolicy) -> Self {
        Self { call, policy }
    }

    pub async fn run(
        &self,
        sheet: &FactSheet,
        chunks: &[Chunk],
        verifier: &GroundingVerifier,
    ) -> Result<AuditReport, PipelineError> {
        let mut findings = deterministic_findings(sheet);

        let recommendations = self.recommend(sheet).await?;
        let checked = self.critic_pass(recommendations, chunks).await?;
        findings.extend(checked);

        // Grounded findings become claims; the verifier has the last word
        let grounded: Vec<&AuditFinding> = findings.iter().filter(|f| f.is_grounded).collect();
        let claims: Vec<Claim> = grounded
            .iter()
            .map(|f| Claim::factual(&f.description, f.evidence_chunk_ids.clone()))
            .collect();
        let verification = verifier.verify_all(&claims).await?;

        let rejected: Vec<String> = claims
            .iter()
            .zip(&verification)
            .filter(|(_, v)| v.verdict == Verdict::Unsupported)
            .map(|(c, _)| c.text.clone())
            .collect();
        if !rejected.is_empty() {
            tracing::warn!(count = rejected.len(), "audit findings rejected by verifier");
            findings.retain(|f| !f.is_grounded || !rejected.contains(&f.description));
        }

        Ok(AuditReport {
            findings,
            verification,
        })
    }

    async fn recommend(&self, sheet: &FactSheet) -> Result<Vec<AuditFinding>, PipelineError> {
        let prompt = PromptSpec::new(format!("Fact sheet:\n{}", sheet.summary()))
            .with_system(RECOMMEND_SYSTEM_PROMPT)
            .with_temperature(0.2);

        let raw: Vec<RawRecommendation> =
            invoke_structured(self.call.as_ref(), &prompt, &self.policy).await?;

        Ok(raw
            .into_iter()
            .enumerate()
            .map(|(i, r)| AuditFinding {
                finding_id: format!("rec-{i}"),
                category: FindingCategory::Completeness,
                severity: FindingSeverity::Medium,
                title: r.title,
                description: r.description,
                evidence_chunk_ids: Vec::new(),
                is_grounded: false,
                recommendation: Some(r.recommendation),
                critic_verified: false,
                critic_note: None,
            })
            .collect())
    }

    /// Ask whether each ungrounded recommendation is justified by the
    /// source. Unsupported recommendations stay in the report, flagged.
    async fn critic_pass(
        &self,
        findings: Vec<AuditFinding>,
        chunks: &[Chunk],
    ) -> Result<Vec<AuditFinding>, PipelineError> {
        let context: String = chunks
            .iter()
            .take(30)
            .map(|c| format!("[{}] {}\n", c.id, c.text.chars().take(800).collect::<String>()))
            .collect();

        let mut checked = Vec::with_capacity(findings.len());
        for mut finding in findings {
            if finding.is_grounded {
                checked.push(finding);
                continue;
            }
            let prompt = PromptSpec::new(format!(
                "Recommendation: {}\n{}\n\nSource passages:\n{context}",
                finding.title,
                finding.recommendation.as_deref().unwrap_or(""),
            ))
            .with_system(CRITIC_SYSTEM_PROMPT)
            .with_temperature(0.0);

            let answer: CriticAnswer =
                invoke_structured(self.call.as_ref(), &prompt, &self.policy).await?;
            finding.critic_verified = answer.supported;
            finding.critic_note = Some(answer.note);
            checked.push(finding);
        }
        Ok(checked)
    }
}

// ============================================================================
// Deterministic Checks
// ============================================================================

/// Spec entries with the same name but different values, read off the
/// `key_specs` field
fn contradictory_spec_findings(sheet: &FactSheet) -> Vec<AuditFinding> {
    let Some(fv) = sheet.get(FactField::KeySpecs) else {
        return Vec::new();
    };
    let Some(specs) = fv.value.as_array() else {
        return Vec::new();
    };

    let mut by_name: HashMap<String, Vec<String>> = HashMap::new();
    for spec in specs {
        let name = spec["name"].as_str().unwrap_or("").trim().to_lowercase();
        if name.is_empty() {
            continue;
        }
        let rendered = format!(
            "{}{}",
            spec["value"].as_str().unwrap_or(""),
            spec["unit"].as_str().unwrap_or("")
        );
        by_name.entry(name).or_default().push(rendered);
    }

    let mut findings = Vec::new();
    for (name, values) in by_name {
        let distinct: std::collections::HashSet<&String> = values.iter().collect();
        if distinct.len() > 1 {
            findings.push(AuditFinding {
                finding_id: format!("spec-conflict-{name}"),
                category: FindingCategory::Consistency,
                severity: FindingSeverity::High,
                title: format!("Contradictory spec '{name}'"),
                description: format!(
                    "Spec '{name}' appears with multiple values: {}",
                    values.join(", ")
                ),
                evidence_chunk_ids: fv.provenance.clone(),
                is_grounded: true,
                recommendation: None,
                critic_verified: false,
                critic_note: None,
            });
        }
    }
    findings
}

/// Numeric spec values with no unit, for names that normally carry one
fn missing_unit_findings(sheet: &FactSheet) -> Vec<AuditFinding> {
    let unit_expecting = [
        "weight", "dimension", "length", "width", "height", "temperature", "pressure",
        "speed", "voltage", "current", "power", "capacity",
    ];
    let bare_number = Regex::new(r"^-?\d+(\.\d+)?$").unwrap();

    let Some(fv) = sheet.get(FactField::KeySpecs) else {
        return Vec::new();
    };
    let Some(specs) = fv.value.as_array() else {
        return Vec::new();
    };

    let mut findings = Vec::new();
    for (i, spec) in specs.iter().enumerate() {
        let name = spec["name"].as_str().unwrap_or("");
        let value = spec["value"].as_str().unwrap_or("");
        let unit = spec["unit"].as_str().unwrap_or("");
        let name_lower = name.to_lowercase();

        if bare_number.is_match(value.trim())
            && unit.is_empty()
            && unit_expecting.iter().any(|u| name_lower.contains(u))
        {
            findings.push(AuditFinding {
                finding_id: format!("missing-unit-{i}"),
                category: FindingCategory::Accuracy,
                severity: FindingSeverity::Medium,
                title: format!("Spec '{name}' likely needs a unit"),
                description: format!("Spec '{name}' has bare numeric value '{value}' with no unit"),
                evidence_chunk_ids: fv.provenance.clone(),
                is_grounded: true,
                recommendation: None,
                critic_verified: false,
                critic_note: None,
            });
        }
    }
    findings
}

fn deterministic_findings(sheet: &FactSheet) -> Vec<AuditFinding> {
    let mut findings = contradictory_spec_findings(sheet);
    findings.extend(missing_unit_findings(sheet));
    findings
}
