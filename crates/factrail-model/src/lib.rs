//! Factrail Data Model: chunks, facts, claims, jobs
//!
//! Shared types for the grounded-content pipeline. Data flows strictly
//! forward; the orchestrator is the only writer of cross-stage state.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                      GROUNDED CONTENT PIPELINE                       │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                      │
//! │  ┌────────┐    ┌───────────┐    ┌──────────┐    ┌────────────────┐  │
//! │  │ Chunks │───►│ FactSheet │───►│  Audit   │───►│ Content drafts │  │
//! │  │ (store)│    │ +provenance│   │ findings │    │  (claims)      │  │
//! │  └────────┘    └───────────┘    └──────────┘    └────────────────┘  │
//! │       ▲              │               │                  │           │
//! │       │              ▼               ▼                  ▼           │
//! │       │         ┌──────────────────────────────────────────┐       │
//! │       └─────────│         Grounding Verifier               │       │
//! │    citations    │  SUPPORTED / UNSUPPORTED / AMBIGUOUS     │       │
//! │                 └──────────────────────────────────────────┘       │
//! │                                                                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Invariants carried by these types:
//! - chunk ids are unique per project and never mutate once stored
//! - every populated fact-sheet field cites at least one chunk id
//! - a factual claim with no citations can never verify as supported
//! - terminal job states (`Succeeded`, `Failed`) are immutable

pub mod audit;
pub mod chunk;
pub mod claim;
pub mod content;
pub mod factsheet;
pub mod job;
pub mod project;

use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a project (one document's chunks + job history)
pub type ProjectId = Uuid;

/// Unique identifier for a pipeline job
pub type JobId = Uuid;

/// Unique identifier for a generated claim
pub type ClaimId = Uuid;

/// Opaque stable identifier for a source chunk (e.g. `pdf-p3-c2`)
pub type ChunkId = String;

// ============================================================================
// Re-exports
// ============================================================================

pub use audit::{AuditFinding, AuditReport, FindingCategory, FindingSeverity};
pub use chunk::{Chunk, ChunkStore, ChunkStoreError, InMemoryChunkStore, SourceLocator};
pub use claim::{Claim, VerificationResult, Verdict};
pub use content::{Audience, ContentBundle, ContentType, Draft, Tone};
pub use factsheet::{
    Confidence, FactField, FactSheet, FactSheetError, FactValue, MissingFactQuestion,
    PreflightReport,
};
pub use job::{JobStatus, JobStatusView, Overrides, PipelineJob, Stage, StageOutputs};
pub use project::{Project, ProjectError, ProjectRegistry};
