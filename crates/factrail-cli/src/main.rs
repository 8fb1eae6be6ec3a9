//! Factrail CLI
//!
//! Drive the grounded-content pipeline from the command line:
//! - `run`    — submit a chunk file and drive the job to done/blocked/failed
//! - `resume` — continue a blocked job, optionally with override flags
//! - `status` — poll a job's persisted state
//!
//! Chunks arrive as JSON lines (one `Chunk` per line), the way the
//! ingestion boundary hands them over. Job state persists under
//! `--data-dir`, so `status` and `resume` work across process restarts.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use factrail_llm::{create_reasoner, MockReasoner, ReasoningCall, RetryPolicy};
use factrail_model::{Chunk, InMemoryChunkStore, JobStatus, JobStatusView, Overrides};
use factrail_pipeline::{
    FileJobStore, JobStore, Orchestrator, OrchestratorConfig, SubmitRequest,
};
use factrail_verifier::{EntailmentJudge, LexicalJudge, LlmJudge};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "factrail")]
#[command(author, version, about = "Factrail: source-grounded content pipeline")]
struct Cli {
    /// Directory for persisted job state
    #[arg(long, global = true, default_value = ".factrail")]
    data_dir: PathBuf,

    /// Reasoning provider: mock, openai, anthropic
    #[arg(long, global = true, default_value = "mock")]
    provider: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a chunk file and run the pipeline
    Run {
        /// JSON-lines file with one chunk per line
        #[arg(long)]
        chunks: PathBuf,

        /// Document id the chunks belong to
        #[arg(long, default_value = "doc-1")]
        doc_id: String,

        /// Continue past a failed preflight, marking assumptions
        #[arg(long)]
        proceed_with_assumptions: bool,

        /// Allow completion despite unverified claims (annotated)
        #[arg(long)]
        allow_unsafe: bool,
    },

    /// Continue a blocked or interrupted job
    Resume {
        job_id: Uuid,

        /// Chunk file to re-ingest (ids are stable, re-fetch is idempotent)
        #[arg(long)]
        chunks: Option<PathBuf>,

        #[arg(long)]
        proceed_with_assumptions: bool,

        #[arg(long)]
        allow_unsafe: bool,
    },

    /// Print a job's current status
    Status { job_id: Uuid },
}

fn load_chunks(path: &PathBuf) -> Result<Vec<Chunk>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut chunks = Vec::new();
    for (i, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let chunk: Chunk =
            serde_json::from_str(line).with_context(|| format!("chunk on line {}", i + 1))?;
        chunks.push(chunk);
    }
    Ok(chunks)
}

fn build_reasoner(provider: &str) -> Result<Arc<dyn ReasoningCall>> {
    if provider == "mock" {
        return Ok(Arc::new(MockReasoner::always(serde_json::json!({}))));
    }
    let mut config = HashMap::new();
    if let Ok(key) = std::env::var("FACTRAIL_API_KEY") {
        config.insert("api_key".to_string(), key);
    }
    if let Ok(model) = std::env::var("FACTRAIL_MODEL") {
        config.insert("model".to_string(), model);
    }
    let reasoner = create_reasoner(provider, &config)
        .map_err(|e| anyhow!("provider {provider}: {e}"))?;
    Ok(Arc::from(reasoner))
}

fn build_judge(provider: &str, call: &Arc<dyn ReasoningCall>) -> Arc<dyn EntailmentJudge> {
    // Offline runs judge lexically; real providers adjudicate with the LLM
    if provider == "mock" {
        Arc::new(LexicalJudge::new())
    } else {
        Arc::new(LlmJudge::new(Arc::clone(call), RetryPolicy::default()))
    }
}

fn print_status(view: &JobStatusView) {
    let status = match view.status {
        JobStatus::Succeeded => "succeeded".green().bold(),
        JobStatus::Failed => "failed".red().bold(),
        JobStatus::PreflightBlocked => "preflight blocked".yellow().bold(),
        JobStatus::Running => "running".cyan(),
        JobStatus::Queued => "queued".normal(),
    };
    println!("job      {}", view.job_id);
    println!("status   {status}");
    println!("stage    {} ({}%)", view.stage, view.progress);
    println!("detail   {}", view.stage_detail);
    println!(
        "outputs  factsheet={} audit={} content={}",
        view.has_factsheet, view.has_audit, view.has_content
    );
    if let Some(message) = &view.error_message {
        println!("error    {}", message.red());
    }
}

fn print_blocked_questions(jobs: &FileJobStore, job_id: Uuid) -> Result<()> {
    let Some(job) = jobs.get(job_id)? else {
        return Ok(());
    };
    let Some(preflight) = &job.outputs.preflight else {
        return Ok(());
    };
    println!();
    println!(
        "{} ({} of {} facts found)",
        "Missing facts".yellow().bold(),
        preflight.facts_found,
        preflight.facts_expected
    );
    for q in &preflight.questions {
        println!("  {} {}", format!("[{}]", q.field).bold(), q.question);
        println!("      {}", q.why_needed.dimmed());
    }
    println!(
        "\nSupply the facts and re-run, or `factrail resume {job_id} --proceed-with-assumptions`."
    );
    Ok(())
}

async fn drive(
    orchestrator: &Orchestrator,
    jobs: &FileJobStore,
    job_id: Uuid,
) -> Result<()> {
    match orchestrator.run(job_id).await {
        Ok(view) => {
            print_status(&view);
            if view.status == JobStatus::PreflightBlocked {
                print_blocked_questions(jobs, job_id)?;
            }
            Ok(())
        }
        Err(err) => {
            if let Ok(view) = orchestrator.status(job_id) {
                print_status(&view);
            }
            Err(err.into())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "factrail=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let chunk_store = Arc::new(InMemoryChunkStore::new());
    let jobs = Arc::new(FileJobStore::open(&cli.data_dir)?);
    let reasoner = build_reasoner(&cli.provider)?;
    let judge = build_judge(&cli.provider, &reasoner);
    let orchestrator = Orchestrator::new(
        Arc::clone(&chunk_store),
        Arc::clone(&jobs) as Arc<dyn JobStore>,
        Arc::clone(&reasoner),
        judge,
        OrchestratorConfig::default(),
    );

    match cli.command {
        Commands::Run {
            chunks,
            doc_id,
            proceed_with_assumptions,
            allow_unsafe,
        } => {
            let chunks = load_chunks(&chunks)?;
            println!("{} {} chunk(s)", "Ingesting".cyan().bold(), chunks.len());
            let job_id = orchestrator.submit(SubmitRequest {
                project_id: Uuid::new_v4(),
                doc_id,
                chunks,
                overrides: Overrides {
                    proceed_with_assumptions,
                    allow_unsafe,
                },
                idempotency_key: None,
            })?;
            drive(&orchestrator, &jobs, job_id).await
        }

        Commands::Resume {
            job_id,
            chunks,
            proceed_with_assumptions,
            allow_unsafe,
        } => {
            if let Some(path) = chunks {
                for chunk in load_chunks(&path)? {
                    chunk_store
                        .insert(chunk)
                        .map_err(|e| anyhow!("re-ingest: {e}"))?;
                }
            }
            let view = orchestrator
                .resume(
                    job_id,
                    Overrides {
                        proceed_with_assumptions,
                        allow_unsafe,
                    },
                )
                .await?;
            print_status(&view);
            if view.status == JobStatus::PreflightBlocked {
                print_blocked_questions(&jobs, job_id)?;
            }
            Ok(())
        }

        Commands::Status { job_id } => {
            let view = orchestrator.status(job_id)?;
            print_status(&view);
            Ok(())
        }
    }
}
