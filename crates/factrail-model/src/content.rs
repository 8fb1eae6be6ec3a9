//! Content drafts: generator output as verifiable claim lists
//!
//! Generators never emit raw prose with facts buried in it. Every sentence
//! intended as a fact is a separate [`Claim`] so the verifier can check one
//! statement at a time. What a generator cannot ground goes in the
//! `assumptions` list instead.

use crate::claim::{Claim, VerificationResult};
use serde::{Deserialize, Serialize};

/// Content types the pipeline can draft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Faq,
    LandingPage,
    UseCase,
    Comparison,
}

impl ContentType {
    pub const ALL: [ContentType; 4] = [
        ContentType::Faq,
        ContentType::LandingPage,
        ContentType::UseCase,
        ContentType::Comparison,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Faq => "faq",
            ContentType::LandingPage => "landing_page",
            ContentType::UseCase => "use_case",
            ContentType::Comparison => "comparison",
        }
    }
}

/// Writing tone, enumerated rather than open-ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Professional,
    Friendly,
    Technical,
}

impl Default for Tone {
    fn default() -> Self {
        Tone::Professional
    }
}

/// Target audience for generated copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Engineer,
    Procurement,
    Executive,
}

impl Default for Audience {
    fn default() -> Self {
        Audience::Engineer
    }
}

/// One generated draft: an ordered claim list for a single content type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub content_type: ContentType,
    pub claims: Vec<Claim>,
    /// Statements the generator could not ground and did not assert as fact
    pub assumptions: Vec<String>,
}

/// Persisted output of the content stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentBundle {
    pub drafts: Vec<Draft>,
    /// Pipeline-level assumptions (e.g. "generated despite missing fields")
    pub assumptions: Vec<String>,
    pub verification: Vec<VerificationResult>,
    /// Claims released despite an UNSUPPORTED verdict under `allow_unsafe`
    pub unsafe_claims: Vec<Claim>,
}

impl ContentBundle {
    pub fn all_claims(&self) -> impl Iterator<Item = &Claim> {
        self.drafts.iter().flat_map(|d| d.claims.iter())
    }

    pub fn factual_claims(&self) -> impl Iterator<Item = &Claim> {
        self.all_claims().filter(|c| c.is_factual)
    }
}
