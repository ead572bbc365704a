//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use lotwise_core::JobId;

use super::types::{Job, JobStatus};

/// Durable record of jobs and their status.
///
/// `claim_batch` is the only operation that needs cross-worker coordination;
/// every other write targets a job the caller has already claimed.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job (producer side).
    async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError>;

    /// Get a job by ID.
    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Atomically move up to `limit` claimable jobs (PENDING, `available_at <= now`),
    /// oldest `created_at` first, to PROCESSING and return them.
    ///
    /// Concurrent callers never receive the same job. An empty result is not an error.
    async fn claim_batch(&self, limit: usize, now: DateTime<Utc>)
    -> Result<Vec<Job>, JobStoreError>;

    /// Persist the outcome of processing a claimed job.
    ///
    /// Fails with `NotClaimed` if the stored row is no longer PROCESSING.
    async fn save_claimed(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Count jobs per status.
    async fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {0} is not claimed")]
    NotClaimed(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: u64,
    pub processing: u64,
    pub succeeded: u64,
    pub needs_review: u64,
    pub failed: u64,
}

impl JobStats {
    pub(crate) fn add(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Succeeded => self.succeeded += count,
            JobStatus::NeedsReview => self.needs_review += count,
            JobStatus::Failed => self.failed += count,
        }
    }
}

/// In-memory job store for tests/dev.
///
/// A single mutex guards the whole table, so a claim's select-and-update is atomic.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, Job>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs();
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.jobs().get(&job_id).cloned())
    }

    async fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError> {
        let mut jobs = self.jobs();

        let mut candidates: Vec<_> = jobs
            .values()
            .filter(|j| j.is_claimable(now))
            .map(|j| (j.created_at, j.id))
            .collect();

        // FIFO by creation time; id breaks ties deterministically.
        candidates.sort();
        candidates.truncate(limit);

        let mut claimed = Vec::with_capacity(candidates.len());
        for (_, id) in candidates {
            if let Some(job) = jobs.get_mut(&id) {
                job.mark_processing(now)
                    .map_err(|e| JobStoreError::Storage(e.to_string()))?;
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn save_claimed(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs();
        let stored = jobs.get_mut(&job.id).ok_or(JobStoreError::NotFound(job.id))?;
        if stored.status != JobStatus::Processing {
            return Err(JobStoreError::NotClaimed(job.id));
        }
        *stored = job.clone();
        Ok(())
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let mut stats = JobStats::default();
        for job in self.jobs().values() {
            stats.add(job.status, 1);
        }
        Ok(stats)
    }
}

#[async_trait]
impl<T: JobStore + ?Sized> JobStore for Arc<T> {
    async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        (**self).enqueue(job).await
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(job_id).await
    }

    async fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError> {
        (**self).claim_batch(limit, now).await
    }

    async fn save_claimed(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).save_claimed(job).await
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats().await
    }
}
