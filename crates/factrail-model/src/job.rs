//! Pipeline job: the one entity with a true state machine
//!
//! ```text
//! queued → ingest → factsheet → audit → content → done
//!                       │
//!                       └── preflight_blocked  (pause, not failure)
//!            any stage ──────────────────────► failed
//! ```
//!
//! Stage outputs are persisted before the transition is recorded, so a
//! crash between stages resumes at the last completed stage. Progress never
//! decreases while a job is running.

use crate::audit::AuditReport;
use crate::content::ContentBundle;
use crate::factsheet::{FactSheet, PreflightReport};
use crate::{JobId, ProjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Stages & Status
// ============================================================================

/// One step of the pipeline state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingest,
    Factsheet,
    Audit,
    Content,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Factsheet => "factsheet",
            Stage::Audit => "audit",
            Stage::Content => "content",
            Stage::Done => "done",
        }
    }

    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Ingest => Some(Stage::Factsheet),
            Stage::Factsheet => Some(Stage::Audit),
            Stage::Audit => Some(Stage::Content),
            Stage::Content => Some(Stage::Done),
            Stage::Done => None,
        }
    }

    /// Progress window [start, end] this stage occupies, in percent
    pub fn progress_window(&self) -> (u8, u8) {
        match self {
            Stage::Ingest => (0, 10),
            Stage::Factsheet => (10, 40),
            Stage::Audit => (40, 65),
            Stage::Content => (65, 90),
            Stage::Done => (90, 100),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    /// Halted awaiting new facts or an explicit override; not a failure
    PreflightBlocked,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// Caller-supplied policy flags, accepted at job start or while blocked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overrides {
    /// Continue past a failed preflight, marking outputs with assumptions
    pub proceed_with_assumptions: bool,
    /// Allow `done` despite UNSUPPORTED claims, annotating instead of blocking
    pub allow_unsafe: bool,
}

// ============================================================================
// Stage Outputs
// ============================================================================

/// Persisted per-stage outputs. A stage with `Some` output is complete and
/// is never re-run on resume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutputs {
    pub chunk_count: Option<usize>,
    pub fact_sheet: Option<FactSheet>,
    /// Last preflight evaluated for this job (kept for status detail)
    pub preflight: Option<PreflightReport>,
    pub audit: Option<AuditReport>,
    pub content: Option<ContentBundle>,
}

impl StageOutputs {
    pub fn stage_complete(&self, stage: Stage) -> bool {
        match stage {
            Stage::Ingest => self.chunk_count.is_some(),
            Stage::Factsheet => self.fact_sheet.is_some(),
            Stage::Audit => self.audit.is_some(),
            Stage::Content => self.content.is_some(),
            Stage::Done => false,
        }
    }
}

// ============================================================================
// Pipeline Job
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum JobStateError {
    #[error("job {0} is in a terminal state and cannot change")]
    Terminal(JobId),
}

/// A multi-stage pipeline run over one project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineJob {
    pub job_id: JobId,
    pub project_id: ProjectId,
    /// Document whose chunks this job processes
    pub doc_id: String,
    /// Submissions with the same key while a job is in flight return that
    /// job instead of starting a second one
    pub idempotency_key: Option<String>,
    pub stage: Stage,
    pub status: JobStatus,
    pub progress: u8,
    pub overrides: Overrides,
    pub outputs: StageOutputs,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineJob {
    pub fn new(
        project_id: ProjectId,
        doc_id: &str,
        overrides: Overrides,
        idempotency_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            project_id,
            doc_id: doc_id.to_string(),
            idempotency_key,
            stage: Stage::Ingest,
            status: JobStatus::Queued,
            progress: 0,
            overrides,
            outputs: StageOutputs::default(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn guard_mutable(&self) -> Result<(), JobStateError> {
        if self.status.is_terminal() {
            return Err(JobStateError::Terminal(self.job_id));
        }
        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<(), JobStateError> {
        self.guard_mutable()?;
        self.status = JobStatus::Running;
        self.touch();
        Ok(())
    }

    pub fn mark_preflight_blocked(&mut self) -> Result<(), JobStateError> {
        self.guard_mutable()?;
        self.status = JobStatus::PreflightBlocked;
        self.touch();
        Ok(())
    }

    pub fn mark_failed(&mut self, message: &str) -> Result<(), JobStateError> {
        self.guard_mutable()?;
        self.status = JobStatus::Failed;
        self.error_message = Some(message.to_string());
        self.touch();
        Ok(())
    }

    pub fn mark_succeeded(&mut self) -> Result<(), JobStateError> {
        self.guard_mutable()?;
        self.status = JobStatus::Succeeded;
        self.stage = Stage::Done;
        self.progress = 100;
        self.touch();
        Ok(())
    }

    /// Record the transition into the next stage. The current stage's
    /// output must already be persisted in `outputs`.
    pub fn advance(&mut self) -> Result<(), JobStateError> {
        self.guard_mutable()?;
        if let Some(next) = self.stage.next() {
            let (_, end) = self.stage.progress_window();
            self.progress = self.progress.max(end);
            self.stage = next;
            self.touch();
        }
        Ok(())
    }

    /// Report intra-stage progress as a fraction of the active stage's
    /// window. Monotonic: a lower value than already reported is ignored.
    pub fn report_stage_progress(&mut self, fraction: f32) -> Result<(), JobStateError> {
        self.guard_mutable()?;
        let (start, end) = self.stage.progress_window();
        let span = f32::from(end - start);
        let scaled = start + (span * fraction.clamp(0.0, 1.0)) as u8;
        self.progress = self.progress.max(scaled.min(end));
        self.touch();
        Ok(())
    }

    /// Non-blocking status snapshot for external pollers
    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.job_id,
            status: self.status,
            stage: self.stage,
            progress: self.progress,
            stage_detail: self.stage_detail(),
            has_factsheet: self.outputs.fact_sheet.is_some(),
            has_audit: self.outputs.audit.is_some(),
            has_content: self.outputs.content.is_some(),
            error_message: self.error_message.clone(),
        }
    }

    fn stage_detail(&self) -> String {
        match self.status {
            JobStatus::Queued => "queued".to_string(),
            JobStatus::PreflightBlocked => {
                let missing = self
                    .outputs
                    .preflight
                    .as_ref()
                    .map(|p| p.missing_fields.len())
                    .unwrap_or(0);
                format!("awaiting input: {missing} missing fields")
            }
            JobStatus::Failed => format!("failed at {}", self.stage),
            JobStatus::Succeeded => "done".to_string(),
            JobStatus::Running => format!("running {}", self.stage),
        }
    }
}

/// Read-only status contract consumed by external callers (polling)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub stage: Stage,
    pub progress: u8,
    pub stage_detail: String,
    pub has_factsheet: bool,
    pub has_audit: bool,
    pub has_content: bool,
    pub error_message: Option<String>,
}
