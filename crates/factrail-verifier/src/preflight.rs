//! Preflight: pre-generation completeness check
//!
//! Required fields are a declarative per-content-type table, not scattered
//! conditionals — adding an output type means adding a table row. Critical
//! fields block generation; important fields only degrade confidence,
//! which is what makes "generate anyway with assumptions" a bounded-risk
//! override instead of an all-or-nothing gate.

use factrail_model::{
    ContentType, FactField, FactSheet, MissingFactQuestion, PreflightReport,
};

/// How much a missing field matters for a given content type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRequirement {
    /// Missing ⇒ `can_generate = false`
    Critical,
    /// Missing ⇒ question + degraded confidence, never a block
    Important,
}

/// Requirement table: one row per (content type, field)
pub fn requirements_for(content_type: ContentType) -> &'static [(FactField, FieldRequirement)] {
    use FactField as F;
    use FieldRequirement::{Critical, Important};

    match content_type {
        ContentType::Faq => &[
            (F::ProductName, Critical),
            (F::ProductCategory, Critical),
            (F::KeySpecs, Critical),
            (F::PrimaryUseCases, Important),
            (F::Constraints, Important),
            (F::CertificationsStandards, Important),
            (F::IntegrationsInterfaces, Important),
            (F::MaintenanceCalibration, Important),
        ],
        ContentType::LandingPage => &[
            (F::ProductName, Critical),
            (F::ProductCategory, Critical),
            (F::KeySpecs, Critical),
            (F::PrimaryUseCases, Critical),
            (F::TargetBuyerRoles, Important),
            (F::Differentiators, Important),
            (F::CertificationsStandards, Important),
        ],
        ContentType::UseCase => &[
            (F::ProductName, Critical),
            (F::PrimaryUseCases, Critical),
            (F::TargetBuyerRoles, Important),
            (F::KeySpecs, Important),
            (F::Constraints, Important),
            (F::OperatingTempRange, Important),
        ],
        ContentType::Comparison => &[
            (F::ProductName, Critical),
            (F::KeySpecs, Critical),
            (F::Differentiators, Important),
            (F::Accuracy, Important),
            (F::OperatingTempRange, Important),
            (F::PowerSupply, Important),
        ],
    }
}

/// Targeted question + one-line justification for a missing field
fn question_for(field: FactField) -> (&'static str, &'static str) {
    match field {
        FactField::ProductName => (
            "What is the exact product name?",
            "Required to title all outputs",
        ),
        FactField::ProductCategory => (
            "What product category does this belong to?",
            "Needed for FAQ theming and positioning copy",
        ),
        FactField::PrimaryUseCases => (
            "What are the primary use cases or applications?",
            "Required to generate use-case pages",
        ),
        FactField::TargetBuyerRoles => (
            "Who is the target buyer (e.g. process engineer, facility manager)?",
            "Helps tailor tone and question framing",
        ),
        FactField::KeySpecs => (
            "What are the key technical specifications (range, accuracy, output)?",
            "Core specs drive answer blocks and comparison tables",
        ),
        FactField::OperatingTempRange => (
            "What is the operating temperature range?",
            "Needed for environmental-limits answers",
        ),
        FactField::Accuracy => (
            "What accuracy does the product achieve, and under what conditions?",
            "Accuracy claims must cite exact figures",
        ),
        FactField::PowerSupply => (
            "What power supply does the product require?",
            "Needed for installation and compatibility answers",
        ),
        FactField::Constraints => (
            "What are the operating limits or constraints?",
            "Needed for 'not suitable when' statements",
        ),
        FactField::Differentiators => (
            "What differentiates this product from alternatives?",
            "Comparison rows need defensible differences",
        ),
        FactField::CertificationsStandards => (
            "What certifications or standards does the product meet?",
            "Compliance answers cannot be inferred",
        ),
        FactField::IntegrationsInterfaces => (
            "What output signals or communication protocols are supported?",
            "Needed for compatibility and integration answers",
        ),
        FactField::MaintenanceCalibration => (
            "What is the calibration or maintenance schedule?",
            "Maintenance answers need documented intervals",
        ),
    }
}

/// Run the completeness check for one content type
pub fn run_preflight(sheet: &FactSheet, content_type: ContentType) -> PreflightReport {
    preflight_over(sheet, requirements_for(content_type))
}

/// Run the completeness check across several content types at once,
/// merging their tables (a field critical for any requested type is
/// critical for the run)
pub fn run_preflight_all(sheet: &FactSheet, content_types: &[ContentType]) -> PreflightReport {
    let mut merged: Vec<(FactField, FieldRequirement)> = Vec::new();
    for ct in content_types {
        for (field, requirement) in requirements_for(*ct) {
            match merged.iter_mut().find(|(f, _)| f == field) {
                Some((_, existing)) => {
                    if *requirement == FieldRequirement::Critical {
                        *existing = FieldRequirement::Critical;
                    }
                }
                None => merged.push((*field, *requirement)),
            }
        }
    }
    preflight_over(sheet, &merged)
}

fn preflight_over(
    sheet: &FactSheet,
    requirements: &[(FactField, FieldRequirement)],
) -> PreflightReport {
    let mut missing = Vec::new();
    let mut critical_missing = 0usize;

    for (field, requirement) in requirements {
        if !sheet.is_populated(*field) {
            missing.push(*field);
            if *requirement == FieldRequirement::Critical {
                critical_missing += 1;
            }
        }
    }

    let questions = missing
        .iter()
        .map(|field| {
            let (question, why_needed) = question_for(*field);
            MissingFactQuestion {
                field: *field,
                question: question.to_string(),
                why_needed: why_needed.to_string(),
            }
        })
        .collect();

    PreflightReport {
        facts_found: requirements.len() - missing.len(),
        facts_expected: requirements.len(),
        missing_fields: missing,
        questions,
        can_generate: critical_missing == 0,
    }
}
