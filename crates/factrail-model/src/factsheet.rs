//! Fact sheet: structured product facts with per-field provenance
//!
//! Every populated field carries the chunk ids it was extracted from.
//! Fields without supporting evidence are absent, never guessed.

use crate::chunk::ChunkStore;
use crate::ChunkId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Field Schema
// ============================================================================

/// Fixed field schema for the product fact sheet
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FactField {
    ProductName,
    ProductCategory,
    PrimaryUseCases,
    TargetBuyerRoles,
    KeySpecs,
    OperatingTempRange,
    Accuracy,
    PowerSupply,
    Constraints,
    Differentiators,
    CertificationsStandards,
    IntegrationsInterfaces,
    MaintenanceCalibration,
}

impl FactField {
    pub const ALL: [FactField; 13] = [
        FactField::ProductName,
        FactField::ProductCategory,
        FactField::PrimaryUseCases,
        FactField::TargetBuyerRoles,
        FactField::KeySpecs,
        FactField::OperatingTempRange,
        FactField::Accuracy,
        FactField::PowerSupply,
        FactField::Constraints,
        FactField::Differentiators,
        FactField::CertificationsStandards,
        FactField::IntegrationsInterfaces,
        FactField::MaintenanceCalibration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FactField::ProductName => "product_name",
            FactField::ProductCategory => "product_category",
            FactField::PrimaryUseCases => "primary_use_cases",
            FactField::TargetBuyerRoles => "target_buyer_roles",
            FactField::KeySpecs => "key_specs",
            FactField::OperatingTempRange => "operating_temp_range",
            FactField::Accuracy => "accuracy",
            FactField::PowerSupply => "power_supply",
            FactField::Constraints => "constraints",
            FactField::Differentiators => "differentiators",
            FactField::CertificationsStandards => "certifications_standards",
            FactField::IntegrationsInterfaces => "integrations_interfaces",
            FactField::MaintenanceCalibration => "maintenance_calibration",
        }
    }

    pub fn parse(s: &str) -> Option<FactField> {
        FactField::ALL.iter().copied().find(|f| f.as_str() == s)
    }
}

impl std::fmt::Display for FactField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Fact Values
// ============================================================================

/// Extraction confidence tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// A single extracted value plus the chunks that support it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactValue {
    pub value: serde_json::Value,
    pub provenance: Vec<ChunkId>,
    pub confidence: Confidence,
}

#[derive(Debug, thiserror::Error)]
pub enum FactSheetError {
    #[error("field {0} has a value but no provenance chunk ids")]
    MissingProvenance(FactField),
}

// ============================================================================
// Fact Sheet
// ============================================================================

/// Mapping from schema field to extracted value.
///
/// Invariant: every entry has at least one provenance chunk id. Whether
/// those ids resolve against the project's store is checked separately with
/// [`FactSheet::dangling_provenance`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactSheet {
    fields: BTreeMap<FactField, FactValue>,
}

impl FactSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a populated field. Rejects values with empty provenance —
    /// callers null the field instead of guessing.
    pub fn insert(&mut self, field: FactField, value: FactValue) -> Result<(), FactSheetError> {
        if value.provenance.is_empty() {
            return Err(FactSheetError::MissingProvenance(field));
        }
        self.fields.insert(field, value);
        Ok(())
    }

    pub fn get(&self, field: FactField) -> Option<&FactValue> {
        self.fields.get(&field)
    }

    pub fn is_populated(&self, field: FactField) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn populated_count(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FactField, &FactValue)> {
        self.fields.iter()
    }

    /// Fields whose provenance cites a chunk id the store cannot resolve
    pub fn dangling_provenance(&self, store: &dyn ChunkStore) -> Vec<(FactField, ChunkId)> {
        let mut dangling = Vec::new();
        for (field, value) in &self.fields {
            for id in &value.provenance {
                if !store.exists(id) {
                    dangling.push((*field, id.clone()));
                }
            }
        }
        dangling
    }

    /// Concise text summary used as prompt context by the generators
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        for field in FactField::ALL {
            if let Some(fv) = self.fields.get(&field) {
                lines.push(format!("{}: {}", field.as_str(), render_value(&fv.value)));
            }
        }
        lines.join("\n")
    }
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    }
}

// ============================================================================
// Preflight Report
// ============================================================================

/// A targeted question for one missing fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingFactQuestion {
    pub field: FactField,
    pub question: String,
    pub why_needed: String,
}

/// Pre-generation completeness check result.
///
/// `can_generate` is false only when a *critical* field for the requested
/// content type is missing; non-critical gaps degrade confidence without
/// blocking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub missing_fields: Vec<FactField>,
    pub questions: Vec<MissingFactQuestion>,
    pub facts_found: usize,
    pub facts_expected: usize,
    pub can_generate: bool,
}
