//! Factrail Grounding Verifier
//!
//! Decides whether generated statements may be released:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                      GROUNDING VERIFIER                            │
//! ├────────────────────────────────────────────────────────────────────┤
//! │                                                                    │
//! │  Claim ──► is_factual? ──► citations? ──► resolve ids ──► judge    │
//! │              │ no             │ empty        │ dangling     │      │
//! │              ▼                ▼              ▼              ▼      │
//! │          SUPPORTED      UNSUPPORTED     UNSUPPORTED     aggregate  │
//! │         (exempt)       (hard invariant) (hard invariant)    │      │
//! │                                                             ▼      │
//! │                  contradiction ► UNSUPPORTED                       │
//! │                  else entailed ► SUPPORTED, else AMBIGUOUS         │
//! │                                                                    │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two operations: per-claim verification ([`GroundingVerifier`]) and the
//! pre-generation completeness check ([`preflight`]). A bad claim is a
//! verdict, never an error; only infrastructure failures propagate.
//!
//! The entailment judgment itself is pluggable ([`EntailmentJudge`]) — the
//! aggregation policy here does not depend on how the three-way call is
//! made.

pub mod entailment;
pub mod preflight;
pub mod verifier;

pub use entailment::{Entailment, EntailmentJudge, Judgment, LexicalJudge, LlmJudge, MockJudge};
pub use preflight::{requirements_for, run_preflight, run_preflight_all, FieldRequirement};
pub use verifier::{aggregate_verdict, GroundingVerifier, VerifierConfig, VerifierError};
