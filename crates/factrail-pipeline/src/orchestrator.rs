//! The pipeline orchestrator: stage sequencing, persistence, recovery
//!
//! One job is one sequential state machine; stages never run in parallel
//! within a job, and a stage only starts once the previous stage's output
//! is persisted. Jobs for distinct projects run concurrently; a project
//! admits one active job at a time.
//!
//! Resume is idempotent: a stage whose output is already persisted is
//! skipped, never re-run — the reasoning call counts in the tests pin this
//! down. The preflight gate sits on the `factsheet → audit` transition and
//! pauses the job (`PreflightBlocked`) rather than failing it.

use crate::audit::AuditStage;
use crate::error::PipelineError;
use crate::extractor::FactSheetExtractor;
use crate::generators::{DraftGenerator, GenerationParams};
use crate::job_store::JobStore;
use factrail_llm::{ReasoningCall, RetryPolicy};
use factrail_model::{
    Chunk, ChunkStore, ContentBundle, ContentType, InMemoryChunkStore, JobId, JobStatusView,
    Overrides, PipelineJob, Project, ProjectId, ProjectRegistry, Stage, Verdict,
};
use factrail_verifier::{run_preflight_all, EntailmentJudge, GroundingVerifier, VerifierConfig};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Configuration & Events
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Content types drafted by the content stage (and whose preflight
    /// tables gate generation)
    pub content_types: Vec<ContentType>,
    pub params: GenerationParams,
    /// Retry budget for each external reasoning call
    pub retry: RetryPolicy,
    /// Parallel claim verifications per stage
    pub verify_concurrency: usize,
    /// A stage exceeding this fails the job; completed outputs stay intact
    pub stage_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            content_types: ContentType::ALL.to_vec(),
            params: GenerationParams::default(),
            retry: RetryPolicy::default(),
            verify_concurrency: 4,
            stage_timeout: Duration::from_secs(300),
        }
    }
}

/// Events emitted as a job moves through the machine
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    JobQueued { job_id: JobId, project_id: ProjectId },
    StageStarted { job_id: JobId, stage: Stage },
    StageCompleted { job_id: JobId, stage: Stage },
    PreflightBlocked { job_id: JobId, missing_fields: usize },
    ClaimsVerified {
        job_id: JobId,
        supported: usize,
        unsupported: usize,
        ambiguous: usize,
    },
    JobSucceeded { job_id: JobId },
    JobFailed { job_id: JobId, stage: Stage, reason: String },
}

pub type EventHandler = Box<dyn Fn(PipelineEvent) + Send + Sync>;

/// A new pipeline run over one document's chunks
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub project_id: ProjectId,
    pub doc_id: String,
    pub chunks: Vec<Chunk>,
    pub overrides: Overrides,
    pub idempotency_key: Option<String>,
}

// ============================================================================
// Project Serialization
// ============================================================================

/// RAII claim on a project: two pipelines must never race to write the
/// same fact sheet or chunk set
struct ProjectGuard {
    active: Arc<Mutex<HashSet<ProjectId>>>,
    project_id: ProjectId,
}

impl ProjectGuard {
    fn claim(
        active: &Arc<Mutex<HashSet<ProjectId>>>,
        project_id: ProjectId,
    ) -> Result<Self, PipelineError> {
        if !active.lock().insert(project_id) {
            return Err(PipelineError::ProjectBusy(project_id));
        }
        Ok(Self {
            active: Arc::clone(active),
            project_id,
        })
    }
}

impl Drop for ProjectGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.project_id);
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator {
    chunk_store: Arc<InMemoryChunkStore>,
    jobs: Arc<dyn JobStore>,
    call: Arc<dyn ReasoningCall>,
    judge: Arc<dyn EntailmentJudge>,
    config: OrchestratorConfig,
    projects: ProjectRegistry,
    active_projects: Arc<Mutex<HashSet<ProjectId>>>,
    /// Chunks handed in at submit, consumed by the ingest stage
    pending_chunks: DashMap<JobId, Vec<Chunk>>,
    event_handlers: Vec<EventHandler>,
}

impl Orchestrator {
    pub fn new(
        chunk_store: Arc<InMemoryChunkStore>,
        jobs: Arc<dyn JobStore>,
        call: Arc<dyn ReasoningCall>,
        judge: Arc<dyn EntailmentJudge>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            chunk_store,
            jobs,
            call,
            judge,
            config,
            projects: ProjectRegistry::new(),
            active_projects: Arc::new(Mutex::new(HashSet::new())),
            pending_chunks: DashMap::new(),
            event_handlers: Vec::new(),
        }
    }

    pub fn on_event(&mut self, handler: EventHandler) {
        self.event_handlers.push(handler);
    }

    fn emit(&self, event: PipelineEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Create a job. Returns an existing in-flight job when the
    /// idempotency key matches one.
    pub fn submit(&self, request: SubmitRequest) -> Result<JobId, PipelineError> {
        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self.jobs.find_in_flight(key)? {
                tracing::info!(job_id = %existing.job_id, %key, "reusing in-flight job");
                return Ok(existing.job_id);
            }
        }

        self.projects.register(request.project_id, &request.doc_id)?;
        let job = PipelineJob::new(
            request.project_id,
            &request.doc_id,
            request.overrides,
            request.idempotency_key,
        );
        let job_id = job.job_id;
        self.jobs.create(&job)?;
        self.pending_chunks.insert(job_id, request.chunks);
        self.emit(PipelineEvent::JobQueued {
            job_id,
            project_id: request.project_id,
        });
        tracing::info!(%job_id, project_id = %request.project_id, "job queued");
        Ok(job_id)
    }

    pub fn project(&self, project_id: ProjectId) -> Option<Project> {
        self.projects.get(project_id)
    }

    /// Delete a project. Refused while the project has an active job.
    pub fn delete_project(&self, project_id: ProjectId) -> Result<Option<Project>, PipelineError> {
        if self.active_projects.lock().contains(&project_id) {
            return Err(PipelineError::ProjectBusy(project_id));
        }
        Ok(self.projects.delete(project_id))
    }

    /// Non-blocking status read; safe to poll at any cadence
    pub fn status(&self, job_id: JobId) -> Result<JobStatusView, PipelineError> {
        let job = self
            .jobs
            .get(job_id)?
            .ok_or(PipelineError::JobNotFound(job_id))?;
        Ok(job.status_view())
    }

    /// Merge override flags into a job (typically while it is
    /// `PreflightBlocked`) and drive it again
    pub async fn resume(
        &self,
        job_id: JobId,
        overrides: Overrides,
    ) -> Result<JobStatusView, PipelineError> {
        let mut job = self
            .jobs
            .get(job_id)?
            .ok_or(PipelineError::JobNotFound(job_id))?;
        if !job.status.is_terminal() {
            job.overrides.proceed_with_assumptions |= overrides.proceed_with_assumptions;
            job.overrides.allow_unsafe |= overrides.allow_unsafe;
            self.jobs.update(&job)?;
        }
        self.run(job_id).await
    }

    /// Drive a job to completion, a preflight pause, or failure
    pub async fn run(&self, job_id: JobId) -> Result<JobStatusView, PipelineError> {
        let mut job = self
            .jobs
            .get(job_id)?
            .ok_or(PipelineError::JobNotFound(job_id))?;
        if job.status.is_terminal() {
            return Ok(job.status_view());
        }

        let _guard = ProjectGuard::claim(&self.active_projects, job.project_id)?;
        job.mark_running()?;
        self.jobs.update(&job)?;

        match self.drive(&mut job).await {
            Ok(view) => Ok(view),
            Err(err) => {
                let stage = job.stage;
                let reason = format!("{stage}: {err}");
                tracing::error!(%job_id, %stage, %err, "job failed");
                job.mark_failed(&reason).ok();
                self.jobs.update(&job)?;
                self.emit(PipelineEvent::JobFailed {
                    job_id,
                    stage,
                    reason,
                });
                Err(err)
            }
        }
    }

    async fn drive(&self, job: &mut PipelineJob) -> Result<JobStatusView, PipelineError> {
        loop {
            let stage = job.stage;
            self.emit(PipelineEvent::StageStarted {
                job_id: job.job_id,
                stage,
            });
            tracing::info!(job_id = %job.job_id, %stage, "stage started");

            match stage {
                Stage::Ingest => self.run_ingest(job)?,
                Stage::Factsheet => {
                    self.run_factsheet(job).await?;
                    if !self.pass_preflight_gate(job)? {
                        return Ok(job.status_view());
                    }
                }
                Stage::Audit => self.run_audit(job).await?,
                Stage::Content => self.run_content(job).await?,
                Stage::Done => {
                    job.mark_succeeded()?;
                    self.jobs.update(job)?;
                    self.emit(PipelineEvent::JobSucceeded { job_id: job.job_id });
                    tracing::info!(job_id = %job.job_id, "job succeeded");
                    return Ok(job.status_view());
                }
            }

            // Output persisted above; only now record the transition
            job.advance()?;
            self.jobs.update(job)?;
            self.emit(PipelineEvent::StageCompleted {
                job_id: job.job_id,
                stage,
            });
        }
    }

    // ========================================================================
    // Stages
    // ========================================================================

    fn run_ingest(&self, job: &mut PipelineJob) -> Result<(), PipelineError> {
        if job.outputs.stage_complete(Stage::Ingest) {
            return Ok(());
        }

        if let Some((_, chunks)) = self.pending_chunks.remove(&job.job_id) {
            self.chunk_store
                .insert_all(chunks)
                .map_err(|e| PipelineError::ChunkStore(e.to_string()))?;
        }
        let count = self.chunk_store.chunks_for(&job.doc_id).len();
        if count == 0 {
            return Err(PipelineError::EmptyDocument(job.project_id));
        }

        job.outputs.chunk_count = Some(count);
        self.jobs.update(job)?;
        Ok(())
    }

    async fn run_factsheet(&self, job: &mut PipelineJob) -> Result<(), PipelineError> {
        if job.outputs.stage_complete(Stage::Factsheet) {
            return Ok(());
        }

        let chunks = self.chunk_store.chunks_for(&job.doc_id);
        let extractor = FactSheetExtractor::new(Arc::clone(&self.call), self.config.retry.clone());
        let sheet = self
            .with_stage_timeout(Stage::Factsheet, extractor.extract(&chunks))
            .await?;

        job.outputs.fact_sheet = Some(sheet);
        job.report_stage_progress(1.0)?;
        self.jobs.update(job)?;
        Ok(())
    }

    /// The `factsheet → audit` gate. Returns false when the job paused.
    fn pass_preflight_gate(&self, job: &mut PipelineJob) -> Result<bool, PipelineError> {
        let sheet = job
            .outputs
            .fact_sheet
            .as_ref()
            .expect("factsheet stage completed above");
        // Recomputed on every pass — fact coverage may have changed
        let report = run_preflight_all(sheet, &self.config.content_types);
        let can_generate = report.can_generate;
        let missing = report.missing_fields.len();
        job.outputs.preflight = Some(report);

        if !can_generate && !job.overrides.proceed_with_assumptions {
            job.mark_preflight_blocked()?;
            self.jobs.update(job)?;
            self.emit(PipelineEvent::PreflightBlocked {
                job_id: job.job_id,
                missing_fields: missing,
            });
            tracing::info!(job_id = %job.job_id, missing, "preflight blocked");
            return Ok(false);
        }

        self.jobs.update(job)?;
        Ok(true)
    }

    async fn run_audit(&self, job: &mut PipelineJob) -> Result<(), PipelineError> {
        if job.outputs.stage_complete(Stage::Audit) {
            return Ok(());
        }

        let sheet = job
            .outputs
            .fact_sheet
            .clone()
            .expect("audit requires a fact sheet");
        let chunks = self.chunk_store.chunks_for(&job.doc_id);
        let stage = AuditStage::new(Arc::clone(&self.call), self.config.retry.clone());
        let verifier = self.verifier();

        let report = self
            .with_stage_timeout(Stage::Audit, stage.run(&sheet, &chunks, &verifier))
            .await?;

        job.outputs.audit = Some(report);
        job.report_stage_progress(1.0)?;
        self.jobs.update(job)?;
        Ok(())
    }

    async fn run_content(&self, job: &mut PipelineJob) -> Result<(), PipelineError> {
        if job.outputs.stage_complete(Stage::Content) {
            return Ok(());
        }

        let sheet = job
            .outputs
            .fact_sheet
            .clone()
            .expect("content requires a fact sheet");
        let generator = DraftGenerator::new(
            Arc::clone(&self.call),
            self.config.retry.clone(),
            self.config.params,
        );

        let total = self.config.content_types.len();
        let mut drafts = Vec::with_capacity(total);
        for (i, content_type) in self.config.content_types.iter().enumerate() {
            job.report_stage_progress(0.6 * i as f32 / total.max(1) as f32)?;
            self.jobs.update(job)?;
            let draft = self
                .with_stage_timeout(
                    Stage::Content,
                    generator.generate(*content_type, &job.doc_id, &sheet, self.chunk_store.as_ref()),
                )
                .await?;
            drafts.push(draft);
        }

        // Final verification pass over every emitted claim
        let claims: Vec<_> = drafts.iter().flat_map(|d| d.claims.clone()).collect();
        let verifier = self.verifier();
        let verification = self
            .with_stage_timeout(Stage::Content, async {
                verifier.verify_all(&claims).await.map_err(PipelineError::from)
            })
            .await?;
        job.report_stage_progress(0.9)?;
        self.jobs.update(job)?;

        let supported = verification.iter().filter(|v| v.verdict == Verdict::Supported).count();
        let unsupported = verification.iter().filter(|v| v.verdict == Verdict::Unsupported).count();
        let ambiguous = verification.iter().filter(|v| v.verdict == Verdict::Ambiguous).count();
        self.emit(PipelineEvent::ClaimsVerified {
            job_id: job.job_id,
            supported,
            unsupported,
            ambiguous,
        });

        // `content → done` gate: every factual claim needs a SUPPORTED
        // verdict unless allow_unsafe annotates the rest
        let offenders: Vec<_> = claims
            .iter()
            .zip(&verification)
            .filter(|(c, v)| c.is_factual && v.verdict != Verdict::Supported)
            .map(|(c, v)| (c.clone(), v.verdict))
            .collect();

        let mut bundle = ContentBundle {
            drafts,
            assumptions: Vec::new(),
            verification,
            unsafe_claims: Vec::new(),
        };

        if let Some(preflight) = &job.outputs.preflight {
            if job.overrides.proceed_with_assumptions && !preflight.missing_fields.is_empty() {
                bundle
                    .assumptions
                    .push("Generated with missing fields; outputs may be incomplete.".to_string());
                for field in &preflight.missing_fields {
                    bundle
                        .assumptions
                        .push(format!("Assumed: no source data for '{field}'."));
                }
            }
        }

        if !offenders.is_empty() {
            if job.overrides.allow_unsafe {
                tracing::warn!(
                    job_id = %job.job_id,
                    count = offenders.len(),
                    "releasing unverified claims under allow_unsafe"
                );
                bundle.assumptions.push(format!(
                    "Released with {} claim(s) lacking a SUPPORTED verdict (allow_unsafe).",
                    offenders.len()
                ));
                bundle.unsafe_claims = offenders.into_iter().map(|(c, _)| c).collect();
            } else {
                // Prior stage outputs stay persisted for diagnosis
                return Err(PipelineError::UnverifiedClaims { offenders });
            }
        }

        job.outputs.content = Some(bundle);
        self.jobs.update(job)?;
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn verifier(&self) -> GroundingVerifier {
        let store: Arc<dyn ChunkStore> = Arc::clone(&self.chunk_store) as Arc<dyn ChunkStore>;
        GroundingVerifier::new(store, Arc::clone(&self.judge)).with_config(VerifierConfig {
            concurrency: self.config.verify_concurrency,
        })
    }

    async fn with_stage_timeout<T>(
        &self,
        stage: Stage,
        fut: impl Future<Output = Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        match tokio::time::timeout(self.config.stage_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::StageTimeout {
                stage,
                after: self.config.stage_timeout,
            }),
        }
    }
}
