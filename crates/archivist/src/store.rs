//! Storage collaborator for jobs and their reports.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::model::{Job, Report};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Durable home of job state and reports.
///
/// Writes must be visible to any reader as soon as they return, so a
/// polling client always sees the latest persisted snapshot.
pub trait JobStore: Send + Sync {
    fn create_job(&self, job: &Job) -> Result<(), StoreError>;

    fn update_job(&self, job: &Job) -> Result<(), StoreError>;

    fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Replaces every stored item of `report.job_id`.
    fn save_report(&self, report: &Report) -> Result<(), StoreError>;

    fn get_report(&self, job_id: &str) -> Result<Option<Report>, StoreError>;
}

/// Process-local store.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
    reports: RwLock<HashMap<String, Report>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }
}

impl JobStore for MemoryJobStore {
    fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        match jobs.get_mut(&job.id) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(job.id.clone())),
        }
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned())
    }

    fn save_report(&self, report: &Report) -> Result<(), StoreError> {
        self.reports
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(report.job_id.clone(), report.clone());
        Ok(())
    }

    fn get_report(&self, job_id: &str) -> Result<Option<Report>, StoreError> {
        Ok(self
            .reports
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_id)
            .cloned())
    }
}
