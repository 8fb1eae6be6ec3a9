//! End-to-end tests for the pipeline orchestrator
//!
//! These drive complete jobs through the staged state machine with a
//! scripted reasoner and judge:
//! 1. happy path to `done`
//! 2. empty documents fail at ingest
//! 3. preflight gating + `proceed_with_assumptions`
//! 4. restart after a kill resumes without re-running completed stages
//! 5. contradicted claims fail the job unless `allow_unsafe`
//! 6. progress is monotonic across the whole run

use factrail_llm::{MockReasoner, ReasoningCall, RetryPolicy};
use factrail_model::{
    Chunk, Confidence, ContentType, FactField, FactSheet, FactValue, InMemoryChunkStore,
    JobStatus, Overrides, PipelineJob, SourceLocator, Stage,
};
use factrail_pipeline::{
    InMemoryJobStore, JobStore, Orchestrator, OrchestratorConfig, PipelineError, PipelineEvent,
    SubmitRequest,
};
use factrail_verifier::{Entailment, MockJudge};
use serde_json::json;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ============================================================================
// Helpers
// ============================================================================

fn chunks(n: usize) -> Vec<Chunk> {
    (0..n)
        .map(|i| {
            Chunk::new(
                format!("pdf-p1-c{i}"),
                "doc-1",
                &format!("Specification passage number {i} with accuracy range output details"),
                SourceLocator::Pdf { page: 1, offset: i * 100 },
            )
        })
        .collect()
}

/// Fact-sheet extraction response covering the FAQ requirement table,
/// optionally leaving the critical `product_name` null
fn factsheet_response(with_product_name: bool) -> serde_json::Value {
    let mut fields = json!({
        "product_category": {"value": "ultrasonic flow meter", "provenance": ["pdf-p1-c0"], "confidence": "HIGH"},
        "key_specs": {"value": [
            {"name": "Accuracy", "value": "±0.5%", "unit": ""},
            {"name": "Range", "value": "0-100", "unit": "psi"},
        ], "provenance": ["pdf-p1-c1"], "confidence": "HIGH"},
        "primary_use_cases": {"value": ["process monitoring"], "provenance": ["pdf-p1-c2"], "confidence": "MEDIUM"},
        "constraints": {"value": ["not for cryogenic service"], "provenance": ["pdf-p1-c3"], "confidence": "MEDIUM"},
        "certifications_standards": {"value": ["CE"], "provenance": ["pdf-p1-c4"], "confidence": "HIGH"},
        "integrations_interfaces": {"value": ["4-20 mA", "Modbus"], "provenance": ["pdf-p1-c5"], "confidence": "HIGH"},
        "maintenance_calibration": {"value": ["annual calibration"], "provenance": ["pdf-p1-c6"], "confidence": "MEDIUM"},
    });
    if with_product_name {
        fields["product_name"] =
            json!({"value": "FlowSense 200", "provenance": ["pdf-p1-c0"], "confidence": "HIGH"});
    }
    fields
}

fn no_recommendations() -> serde_json::Value {
    json!([])
}

fn faq_draft(cited: &str) -> serde_json::Value {
    json!([
        {"text": "Accuracy is ±0.5% of full scale", "cited_chunk_ids": [cited], "is_factual": true},
        {"text": "A meter your process team will trust", "cited_chunk_ids": [], "is_factual": false},
    ])
}

fn faq_only_config() -> OrchestratorConfig {
    OrchestratorConfig {
        content_types: vec![ContentType::Faq],
        retry: RetryPolicy::none(),
        ..OrchestratorConfig::default()
    }
}

struct Harness {
    orchestrator: Orchestrator,
    jobs: Arc<InMemoryJobStore>,
    reasoner: Arc<MockReasoner>,
}

fn harness(responses: Vec<serde_json::Value>, judge: MockJudge) -> Harness {
    let chunk_store = Arc::new(InMemoryChunkStore::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let reasoner = Arc::new(MockReasoner::with_responses(responses));
    let orchestrator = Orchestrator::new(
        chunk_store,
        Arc::clone(&jobs) as Arc<dyn JobStore>,
        Arc::clone(&reasoner) as Arc<dyn ReasoningCall>,
        Arc::new(judge),
        faq_only_config(),
    );
    Harness {
        orchestrator,
        jobs,
        reasoner,
    }
}

fn submit_request(chunks: Vec<Chunk>, overrides: Overrides) -> SubmitRequest {
    SubmitRequest {
        project_id: Uuid::new_v4(),
        doc_id: "doc-1".to_string(),
        chunks,
        overrides,
        idempotency_key: None,
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn full_pipeline_reaches_done() {
    let h = harness(
        vec![
            factsheet_response(true),
            no_recommendations(),
            faq_draft("pdf-p1-c0"),
        ],
        MockJudge::new(Entailment::Entailed),
    );

    let job_id = h
        .orchestrator
        .submit(submit_request(chunks(3), Overrides::default()))
        .unwrap();
    let view = h.orchestrator.run(job_id).await.unwrap();

    assert_eq!(view.status, JobStatus::Succeeded);
    assert_eq!(view.stage, Stage::Done);
    assert_eq!(view.progress, 100);
    assert!(view.has_factsheet);
    assert!(view.has_audit);
    assert!(view.has_content);
    assert_eq!(h.reasoner.call_count(), 3);
}

#[tokio::test]
async fn empty_document_fails_at_ingest() {
    let h = harness(vec![], MockJudge::new(Entailment::Entailed));

    let job_id = h
        .orchestrator
        .submit(submit_request(vec![], Overrides::default()))
        .unwrap();
    let err = h.orchestrator.run(job_id).await.unwrap_err();
    assert!(matches!(err, PipelineError::EmptyDocument(_)));

    let view = h.orchestrator.status(job_id).unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.error_message.unwrap().contains("ingest"));
    // No reasoning call was ever made
    assert_eq!(h.reasoner.call_count(), 0);
}

#[tokio::test]
async fn preflight_blocks_then_proceeds_with_assumptions() {
    // product_name (critical for FAQ) is the only gap in the sheet
    let h = harness(
        vec![
            factsheet_response(false),
            no_recommendations(),
            faq_draft("pdf-p1-c0"),
        ],
        MockJudge::new(Entailment::Entailed),
    );

    let job_id = h
        .orchestrator
        .submit(submit_request(chunks(10), Overrides::default()))
        .unwrap();
    let view = h.orchestrator.run(job_id).await.unwrap();

    // Paused, not failed, with exactly one question naming the gap
    assert_eq!(view.status, JobStatus::PreflightBlocked);
    let job = h.jobs.get(job_id).unwrap().unwrap();
    let preflight = job.outputs.preflight.unwrap();
    assert!(!preflight.can_generate);
    assert_eq!(preflight.questions.len(), 1);
    assert_eq!(preflight.questions[0].field, FactField::ProductName);
    assert_eq!(h.reasoner.call_count(), 1);

    // Override advances the same job to done with explicit assumptions
    let view = h
        .orchestrator
        .resume(
            job_id,
            Overrides {
                proceed_with_assumptions: true,
                allow_unsafe: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(view.status, JobStatus::Succeeded);

    let job = h.jobs.get(job_id).unwrap().unwrap();
    let bundle = job.outputs.content.unwrap();
    assert!(!bundle.assumptions.is_empty());
    assert!(bundle
        .assumptions
        .iter()
        .any(|a| a.contains("product_name")));
    // The extractor ran exactly once across both runs
    assert_eq!(h.reasoner.call_count(), 3);
}

#[tokio::test]
async fn restart_after_kill_resumes_without_rerunning_extractor() {
    // Persisted state as a crashed process left it: ingest and factsheet
    // complete, killed mid-audit
    let chunk_store = Arc::new(InMemoryChunkStore::new());
    chunk_store.insert_all(chunks(2)).unwrap();

    let mut sheet = FactSheet::new();
    for (field, value) in [
        (FactField::ProductName, json!("FlowSense 200")),
        (FactField::ProductCategory, json!("flow meter")),
        (FactField::KeySpecs, json!([{"name": "Range", "value": "0-100", "unit": "psi"}])),
    ] {
        sheet
            .insert(
                field,
                FactValue {
                    value,
                    provenance: vec!["pdf-p1-c0".into()],
                    confidence: Confidence::High,
                },
            )
            .unwrap();
    }

    let mut job = PipelineJob::new(Uuid::new_v4(), "doc-1", Overrides::default(), None);
    job.mark_running().unwrap();
    job.outputs.chunk_count = Some(2);
    job.outputs.fact_sheet = Some(sheet);
    job.advance().unwrap(); // ingest → factsheet
    job.advance().unwrap(); // factsheet → audit
    assert_eq!(job.stage, Stage::Audit);

    let jobs = Arc::new(InMemoryJobStore::new());
    jobs.create(&job).unwrap();

    // Fresh orchestrator, as after a restart; only audit + content
    // responses are scripted
    let reasoner = Arc::new(MockReasoner::with_responses(vec![
        no_recommendations(),
        faq_draft("pdf-p1-c0"),
    ]));
    let orchestrator = Orchestrator::new(
        chunk_store,
        Arc::clone(&jobs) as Arc<dyn JobStore>,
        Arc::clone(&reasoner) as Arc<dyn ReasoningCall>,
        Arc::new(MockJudge::new(Entailment::Entailed)),
        faq_only_config(),
    );

    let view = orchestrator.run(job.job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Succeeded);

    // Two calls: recommendations + FAQ draft. Zero extraction calls.
    assert_eq!(reasoner.call_count(), 2);
    for prompt in reasoner.prompts() {
        let system = prompt.system.unwrap_or_default();
        assert!(
            !system.contains("fact sheet from source passages"),
            "extractor was re-invoked after restart"
        );
    }
}

#[tokio::test]
async fn contradicted_claim_fails_job_with_unverified_claims() {
    // The FAQ claim cites pdf-p1-c1, scripted to contradict it
    let judge = MockJudge::new(Entailment::Entailed).on_chunk("pdf-p1-c1", Entailment::Contradicted);
    let h = harness(
        vec![
            factsheet_response(true),
            no_recommendations(),
            faq_draft("pdf-p1-c1"),
        ],
        judge,
    );

    let job_id = h
        .orchestrator
        .submit(submit_request(chunks(3), Overrides::default()))
        .unwrap();
    let err = h.orchestrator.run(job_id).await.unwrap_err();

    match &err {
        PipelineError::UnverifiedClaims { offenders } => {
            assert_eq!(offenders.len(), 1);
            assert!(offenders[0].0.text.contains("±0.5%"));
        }
        other => panic!("expected UnverifiedClaims, got {other:?}"),
    }

    let view = h.orchestrator.status(job_id).unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    let message = view.error_message.unwrap();
    assert!(message.contains("content"));
    assert!(message.contains("±0.5%"));
    // Completed stage outputs stay intact for diagnosis
    assert!(view.has_factsheet);
    assert!(view.has_audit);
    assert!(!view.has_content);
}

#[tokio::test]
async fn allow_unsafe_releases_annotated_claims() {
    let judge = MockJudge::new(Entailment::Entailed).on_chunk("pdf-p1-c1", Entailment::Contradicted);
    let h = harness(
        vec![
            factsheet_response(true),
            no_recommendations(),
            faq_draft("pdf-p1-c1"),
        ],
        judge,
    );

    let job_id = h
        .orchestrator
        .submit(submit_request(
            chunks(3),
            Overrides {
                proceed_with_assumptions: false,
                allow_unsafe: true,
            },
        ))
        .unwrap();
    let view = h.orchestrator.run(job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Succeeded);

    let job = h.jobs.get(job_id).unwrap().unwrap();
    let bundle = job.outputs.content.unwrap();
    assert_eq!(bundle.unsafe_claims.len(), 1);
    assert!(bundle.assumptions.iter().any(|a| a.contains("allow_unsafe")));
}

#[tokio::test]
async fn progress_never_decreases_while_running() {
    let h = harness(
        vec![
            factsheet_response(true),
            no_recommendations(),
            faq_draft("pdf-p1-c0"),
        ],
        MockJudge::new(Entailment::Entailed),
    );
    let jobs = Arc::clone(&h.jobs);
    let mut orchestrator = h.orchestrator;

    let observed = Arc::new(Mutex::new(Vec::<u8>::new()));
    let sink = Arc::clone(&observed);
    orchestrator.on_event(Box::new(move |event: PipelineEvent| {
        let job_id = match event {
            PipelineEvent::JobQueued { job_id, .. }
            | PipelineEvent::StageStarted { job_id, .. }
            | PipelineEvent::StageCompleted { job_id, .. }
            | PipelineEvent::PreflightBlocked { job_id, .. }
            | PipelineEvent::ClaimsVerified { job_id, .. }
            | PipelineEvent::JobSucceeded { job_id }
            | PipelineEvent::JobFailed { job_id, .. } => job_id,
        };
        if let Ok(Some(job)) = jobs.get(job_id) {
            sink.lock().unwrap().push(job.progress);
        }
    }));

    let job_id = orchestrator
        .submit(submit_request(chunks(3), Overrides::default()))
        .unwrap();
    orchestrator.run(job_id).await.unwrap();

    let observed = observed.lock().unwrap();
    assert!(observed.len() >= 4);
    for pair in observed.windows(2) {
        assert!(pair[0] <= pair[1], "progress decreased: {observed:?}");
    }
    assert_eq!(*observed.last().unwrap(), 100);
}

#[tokio::test]
async fn idempotency_key_reuses_in_flight_job() {
    let h = harness(vec![], MockJudge::new(Entailment::Entailed));
    let project_id = Uuid::new_v4();

    let request = SubmitRequest {
        project_id,
        doc_id: "doc-1".to_string(),
        chunks: chunks(2),
        overrides: Overrides::default(),
        idempotency_key: Some("key-1".to_string()),
    };
    let first = h.orchestrator.submit(request.clone()).unwrap();
    let second = h.orchestrator.submit(request).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn project_stays_bound_to_its_document() {
    let h = harness(
        vec![
            factsheet_response(true),
            no_recommendations(),
            faq_draft("pdf-p1-c0"),
        ],
        MockJudge::new(Entailment::Entailed),
    );
    let project_id = Uuid::new_v4();

    let job_id = h
        .orchestrator
        .submit(SubmitRequest {
            project_id,
            doc_id: "doc-1".to_string(),
            chunks: chunks(3),
            overrides: Overrides::default(),
            idempotency_key: None,
        })
        .unwrap();
    assert_eq!(h.orchestrator.project(project_id).unwrap().doc_id, "doc-1");

    // Rebinding the project to another document is rejected
    let err = h.orchestrator.submit(SubmitRequest {
        project_id,
        doc_id: "doc-2".to_string(),
        chunks: chunks(1),
        overrides: Overrides::default(),
        idempotency_key: None,
    });
    assert!(matches!(err, Err(PipelineError::Project(_))));

    h.orchestrator.run(job_id).await.unwrap();
    assert!(h.orchestrator.delete_project(project_id).unwrap().is_some());
    assert!(h.orchestrator.project(project_id).is_none());
}

#[tokio::test]
async fn second_job_runs_after_first_releases_project() {
    let h = harness(
        vec![
            // job 1
            factsheet_response(true),
            no_recommendations(),
            faq_draft("pdf-p1-c0"),
            // job 2
            factsheet_response(true),
            no_recommendations(),
            faq_draft("pdf-p1-c0"),
        ],
        MockJudge::new(Entailment::Entailed),
    );
    let project_id = Uuid::new_v4();

    for _ in 0..2 {
        let job_id = h
            .orchestrator
            .submit(SubmitRequest {
                project_id,
                doc_id: "doc-1".to_string(),
                chunks: chunks(3),
                overrides: Overrides::default(),
                idempotency_key: None,
            })
            .unwrap();
        let view = h.orchestrator.run(job_id).await.unwrap();
        assert_eq!(view.status, JobStatus::Succeeded);
    }
}
