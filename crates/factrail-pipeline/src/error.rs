//! Pipeline error taxonomy
//!
//! Infrastructure errors (transport, rate limit) are retried inside the
//! stage before surfacing. Input problems (empty document, unparsable
//! extraction) are fatal for the stage with no retry. Unverified claims
//! fail the job unless `allow_unsafe` was set. `preflight_blocked` is a
//! pause state, not an error, and never appears here.

use factrail_llm::LlmError;
use factrail_model::job::JobStateError;
use factrail_model::project::ProjectError;
use factrail_model::{Claim, JobId, ProjectId, Stage, Verdict};
use factrail_verifier::VerifierError;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("document for project {0} produced zero chunks")]
    EmptyDocument(ProjectId),

    #[error("fact extraction failed: {0}")]
    Extraction(String),

    /// Factual claims without a SUPPORTED verdict at the `content → done`
    /// gate. Lists every offending claim so callers can show them.
    #[error("{} claim(s) failed verification: {}", offenders.len(), format_offenders(offenders))]
    UnverifiedClaims { offenders: Vec<(Claim, Verdict)> },

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Verifier(#[from] VerifierError),

    #[error(transparent)]
    JobState(#[from] JobStateError),

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error("job store failure: {0}")]
    Store(String),

    #[error("chunk store failure: {0}")]
    ChunkStore(String),

    #[error("project {0} already has an active job")]
    ProjectBusy(ProjectId),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("stage {stage} timed out after {after:?}")]
    StageTimeout { stage: Stage, after: Duration },
}

fn format_offenders(offenders: &[(Claim, Verdict)]) -> String {
    offenders
        .iter()
        .map(|(claim, verdict)| format!("{:?} {:?}", claim.text, verdict))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unverified_claims_error_names_each_claim() {
        let claim = Claim::factual("The unit is rated IP68", vec!["pdf-p1-c0".into()]);
        let err = PipelineError::UnverifiedClaims {
            offenders: vec![(claim, Verdict::Unsupported)],
        };
        let message = err.to_string();
        assert!(message.contains("IP68"));
        assert!(message.contains("Unsupported"));
    }
}
