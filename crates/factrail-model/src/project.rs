//! Projects: one document's chunks, fact sheet, and job history
//!
//! Created on ingestion, long-lived until explicit deletion. The
//! orchestrator is the single writer of pipeline-derived state; everything
//! else reads.

use crate::ProjectId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub doc_id: String,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(id: ProjectId, doc_id: &str) -> Self {
        Self {
            id,
            doc_id: doc_id.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("project {0} is already bound to document {1:?}")]
    DocumentMismatch(ProjectId, String),
}

/// Concurrent project registry. Registration is idempotent for the same
/// document; rebinding a project to a different document is an error.
#[derive(Default)]
pub struct ProjectRegistry {
    projects: DashMap<ProjectId, Project>,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ProjectId, doc_id: &str) -> Result<Project, ProjectError> {
        if let Some(existing) = self.projects.get(&id) {
            if existing.doc_id != doc_id {
                return Err(ProjectError::DocumentMismatch(id, existing.doc_id.clone()));
            }
            return Ok(existing.clone());
        }
        let project = Project::new(id, doc_id);
        self.projects.insert(id, project.clone());
        Ok(project)
    }

    pub fn get(&self, id: ProjectId) -> Option<Project> {
        self.projects.get(&id).map(|p| p.clone())
    }

    /// Explicit deletion; projects are otherwise long-lived
    pub fn delete(&self, id: ProjectId) -> Option<Project> {
        self.projects.remove(&id).map(|(_, p)| p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn register_is_idempotent_for_same_document() {
        let registry = ProjectRegistry::new();
        let id = Uuid::new_v4();
        let first = registry.register(id, "doc-1").unwrap();
        let second = registry.register(id, "doc-1").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rebinding_to_another_document_is_rejected() {
        let registry = ProjectRegistry::new();
        let id = Uuid::new_v4();
        registry.register(id, "doc-1").unwrap();
        let err = registry.register(id, "doc-2");
        assert!(matches!(err, Err(ProjectError::DocumentMismatch(_, _))));
    }

    #[test]
    fn delete_removes_the_project() {
        let registry = ProjectRegistry::new();
        let id = Uuid::new_v4();
        registry.register(id, "doc-1").unwrap();
        assert!(registry.delete(id).is_some());
        assert!(registry.get(id).is_none());
    }
}
