//! Job persistence: in-memory for tests, JSON files for deployments
//!
//! The orchestrator persists a stage's output *before* recording the
//! transition, so whatever store is plugged in here is the crash-recovery
//! boundary. The file store keeps one JSON document per job plus an
//! `index.json` mapping idempotency keys to job ids, and survives restarts
//! within the same data directory.

use crate::error::PipelineError;
use factrail_model::{JobId, JobStatus, PipelineJob};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Persistence contract for pipeline jobs. Single writer (the
/// orchestrator); any number of status readers.
pub trait JobStore: Send + Sync {
    fn create(&self, job: &PipelineJob) -> Result<(), PipelineError>;
    fn get(&self, job_id: JobId) -> Result<Option<PipelineJob>, PipelineError>;
    fn update(&self, job: &PipelineJob) -> Result<(), PipelineError>;
    /// In-flight job (queued, running, or blocked) for an idempotency key
    fn find_in_flight(&self, key: &str) -> Result<Option<PipelineJob>, PipelineError>;
}

fn in_flight(status: JobStatus) -> bool {
    matches!(
        status,
        JobStatus::Queued | JobStatus::Running | JobStatus::PreflightBlocked
    )
}

// ============================================================================
// In-Memory Store
// ============================================================================

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, PipelineJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn create(&self, job: &PipelineJob) -> Result<(), PipelineError> {
        self.jobs.write().insert(job.job_id, job.clone());
        Ok(())
    }

    fn get(&self, job_id: JobId) -> Result<Option<PipelineJob>, PipelineError> {
        Ok(self.jobs.read().get(&job_id).cloned())
    }

    fn update(&self, job: &PipelineJob) -> Result<(), PipelineError> {
        self.jobs.write().insert(job.job_id, job.clone());
        Ok(())
    }

    fn find_in_flight(&self, key: &str) -> Result<Option<PipelineJob>, PipelineError> {
        Ok(self
            .jobs
            .read()
            .values()
            .filter(|j| j.idempotency_key.as_deref() == Some(key) && in_flight(j.status))
            .max_by_key(|j| j.created_at)
            .cloned())
    }
}

// ============================================================================
// File Store
// ============================================================================

/// One JSON file per job under `<dir>/jobs/`, plus an idempotency index
pub struct FileJobStore {
    dir: PathBuf,
    index: RwLock<HashMap<String, JobId>>,
}

impl FileJobStore {
    pub fn open(data_dir: &Path) -> Result<Self, PipelineError> {
        let dir = data_dir.join("jobs");
        fs::create_dir_all(&dir).map_err(|e| PipelineError::Store(e.to_string()))?;

        let index_path = dir.join("index.json");
        let index = if index_path.exists() {
            let raw = fs::read_to_string(&index_path)
                .map_err(|e| PipelineError::Store(e.to_string()))?;
            serde_json::from_str(&raw).map_err(|e| PipelineError::Store(e.to_string()))?
        } else {
            HashMap::new()
        };

        Ok(Self {
            dir,
            index: RwLock::new(index),
        })
    }

    fn job_path(&self, job_id: JobId) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }

    fn write_job(&self, job: &PipelineJob) -> Result<(), PipelineError> {
        let payload = serde_json::to_vec_pretty(job)
            .map_err(|e| PipelineError::Store(e.to_string()))?;
        // Write-then-rename so a crash mid-write never corrupts the record
        let tmp = self.dir.join(format!("{}.json.tmp", job.job_id));
        fs::write(&tmp, payload).map_err(|e| PipelineError::Store(e.to_string()))?;
        fs::rename(&tmp, self.job_path(job.job_id))
            .map_err(|e| PipelineError::Store(e.to_string()))?;
        Ok(())
    }

    fn save_index(&self) -> Result<(), PipelineError> {
        let index = self.index.read();
        let payload = serde_json::to_vec_pretty(&*index)
            .map_err(|e| PipelineError::Store(e.to_string()))?;
        fs::write(self.dir.join("index.json"), payload)
            .map_err(|e| PipelineError::Store(e.to_string()))
    }
}

impl JobStore for FileJobStore {
    fn create(&self, job: &PipelineJob) -> Result<(), PipelineError> {
        if let Some(key) = &job.idempotency_key {
            self.index.write().insert(key.clone(), job.job_id);
            self.save_index()?;
        }
        self.write_job(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<PipelineJob>, PipelineError> {
        let path = self.job_path(job_id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path).map_err(|e| PipelineError::Store(e.to_string()))?;
        let job = serde_json::from_str(&raw).map_err(|e| PipelineError::Store(e.to_string()))?;
        Ok(Some(job))
    }

    fn update(&self, job: &PipelineJob) -> Result<(), PipelineError> {
        self.write_job(job)
    }

    fn find_in_flight(&self, key: &str) -> Result<Option<PipelineJob>, PipelineError> {
        let job_id = match self.index.read().get(key) {
            Some(id) => *id,
            None => return Ok(None),
        };
        match self.get(job_id)? {
            Some(job) if in_flight(job.status) => Ok(Some(job)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factrail_model::Overrides;
    use uuid::Uuid;

    fn job_with_key(key: &str) -> PipelineJob {
        PipelineJob::new(Uuid::new_v4(), "doc-1", Overrides::default(), Some(key.to_string()))
    }

    #[test]
    fn in_memory_round_trip() {
        let store = InMemoryJobStore::new();
        let job = job_with_key("k1");
        store.create(&job).unwrap();
        let loaded = store.get(job.job_id).unwrap().unwrap();
        assert_eq!(loaded.job_id, job.job_id);
    }

    #[test]
    fn in_flight_lookup_ignores_terminal_jobs() {
        let store = InMemoryJobStore::new();
        let mut job = job_with_key("k1");
        store.create(&job).unwrap();
        assert!(store.find_in_flight("k1").unwrap().is_some());

        job.mark_running().unwrap();
        job.mark_failed("boom").unwrap();
        store.update(&job).unwrap();
        assert!(store.find_in_flight("k1").unwrap().is_none());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_with_key("k1");
        {
            let store = FileJobStore::open(dir.path()).unwrap();
            store.create(&job).unwrap();
        }
        let reopened = FileJobStore::open(dir.path()).unwrap();
        let loaded = reopened.get(job.job_id).unwrap().unwrap();
        assert_eq!(loaded.job_id, job.job_id);
        assert!(reopened.find_in_flight("k1").unwrap().is_some());
    }

    #[test]
    fn file_store_update_is_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).unwrap();
        let mut job = job_with_key("k1");
        store.create(&job).unwrap();

        job.mark_running().unwrap();
        job.outputs.chunk_count = Some(7);
        store.update(&job).unwrap();

        let loaded = store.get(job.job_id).unwrap().unwrap();
        assert_eq!(loaded.outputs.chunk_count, Some(7));
        assert_eq!(loaded.status, JobStatus::Running);
    }
}
