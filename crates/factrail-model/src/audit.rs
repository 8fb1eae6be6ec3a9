//! Audit findings produced by the audit stage

use crate::claim::VerificationResult;
use crate::ChunkId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    Completeness,
    Consistency,
    Accuracy,
    Structure,
}

/// A single audit finding: either grounded in source chunks or a generated
/// recommendation that must pass the critic before release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFinding {
    pub finding_id: String,
    pub category: FindingCategory,
    pub severity: FindingSeverity,
    pub title: String,
    pub description: String,
    pub evidence_chunk_ids: Vec<ChunkId>,
    /// true = read off the source; false = generated recommendation
    pub is_grounded: bool,
    pub recommendation: Option<String>,
    pub critic_verified: bool,
    pub critic_note: Option<String>,
}

/// Persisted output of the audit stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub findings: Vec<AuditFinding>,
    pub verification: Vec<VerificationResult>,
}

impl AuditReport {
    pub fn finding_count(&self) -> usize {
        self.findings.len()
    }
}
