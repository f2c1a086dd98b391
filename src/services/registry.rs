use parking_lot::Mutex;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::job::{Job, JobConfig, TransitionError};

struct Entry {
    job: Job,
    cancel: CancellationToken,
}

/// In-process store of every job, guarded by a single lock.
///
/// Nothing outside the registry ever holds a reference into the map: reads
/// return clones and writes go through closures run under the lock.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<Uuid, Entry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queued job and return its id.
    pub fn submit(
        &self,
        config: JobConfig,
        row_count: usize,
        source_name: impl Into<String>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let job = Job::new(id, config, row_count, source_name.into());
        self.jobs.lock().insert(
            id,
            Entry {
                job,
                cancel: CancellationToken::new(),
            },
        );
        metrics::counter!("face_jobs_submitted_total").increment(1);
        id
    }

    pub fn get(&self, id: Uuid) -> Result<Job, RegistryError> {
        self.jobs
            .lock()
            .get(&id)
            .map(|entry| entry.job.clone())
            .ok_or(RegistryError::NotFound(id))
    }

    /// Run `mutator` against the live job while holding the lock.
    pub fn update<T, F>(&self, id: Uuid, mutator: F) -> Result<T, RegistryError>
    where
        F: FnOnce(&mut Job) -> T,
    {
        let mut jobs = self.jobs.lock();
        let entry = jobs.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        Ok(mutator(&mut entry.job))
    }

    /// Apply a status transition atomically and return the resulting snapshot.
    pub fn transition<F>(&self, id: Uuid, mutator: F) -> Result<Job, RegistryError>
    where
        F: FnOnce(&mut Job) -> Result<(), TransitionError>,
    {
        let job = self.update(id, |job| {
            mutator(job)?;
            Ok::<_, TransitionError>(job.clone())
        })??;
        Ok(job)
    }

    /// All jobs, oldest submission first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .values()
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by_key(|job| job.submitted_at);
        jobs
    }

    /// Flip a queued or processing job to cancelled and wake its scheduler.
    pub fn cancel(&self, id: Uuid) -> Result<Job, RegistryError> {
        let mut jobs = self.jobs.lock();
        let entry = jobs.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        if entry.job.cancel()? {
            entry.cancel.cancel();
            tracing::info!(job_id = %id, "Job cancelled");
        }
        Ok(entry.job.clone())
    }

    pub fn cancellation_token(&self, id: Uuid) -> Result<CancellationToken, RegistryError> {
        self.jobs
            .lock()
            .get(&id)
            .map(|entry| entry.cancel.clone())
            .ok_or(RegistryError::NotFound(id))
    }

    /// Number of jobs not yet in a terminal state.
    pub fn active_count(&self) -> usize {
        self.jobs
            .lock()
            .values()
            .filter(|entry| !entry.job.status.is_terminal())
            .count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid job state: {0}")]
    Conflict(#[from] TransitionError),
}
