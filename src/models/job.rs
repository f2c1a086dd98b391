use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use strum::Display;
use uuid::Uuid;

use crate::models::dataset::RowOutcome;

/// Lifecycle state of a screening job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Tunables captured when a job is submitted. Never changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct JobConfig {
    #[garde(range(min = 1, max = 64))]
    pub concurrency: usize,

    #[garde(range(min = 1, max = 300))]
    pub download_timeout_secs: u64,

    #[garde(range(min = 0.0, max = 1.0))]
    pub primary_threshold: f32,

    #[garde(range(min = 0.0, max = 1.0))]
    pub fallback_threshold: f32,

    #[garde(range(min = 1))]
    pub checkpoint_interval: usize,

    #[garde(skip)]
    pub persist_artifacts: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            concurrency: 6,
            download_timeout_secs: 20,
            primary_threshold: 0.80,
            fallback_threshold: 0.70,
            checkpoint_interval: 50,
            persist_artifacts: true,
        }
    }
}

impl JobConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job is {from}, cannot move to {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// A batch screening job. Owned by the registry; callers only see clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub config: JobConfig,
    pub original_filename: String,
    pub total_rows: usize,
    pub rows_to_process: usize,
    pub processed: usize,
    pub good_count: usize,
    pub noface_count: usize,
    pub download_error_count: usize,
    pub system_error_count: usize,
    pub result_location: Option<PathBuf>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(id: Uuid, config: JobConfig, total_rows: usize, original_filename: String) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            config,
            original_filename,
            total_rows,
            rows_to_process: 0,
            processed: 0,
            good_count: 0,
            noface_count: 0,
            download_error_count: 0,
            system_error_count: 0,
            result_location: None,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            message: None,
            error: None,
        }
    }

    /// Percentage of eligible rows finished so far.
    pub fn progress(&self) -> f64 {
        if self.rows_to_process == 0 {
            return 0.0;
        }
        self.processed as f64 / self.rows_to_process as f64 * 100.0
    }

    fn guard(&self, to: JobStatus) -> Result<(), TransitionError> {
        let allowed = match (self.status, to) {
            (JobStatus::Queued, JobStatus::Processing) => true,
            (JobStatus::Queued | JobStatus::Processing, JobStatus::Cancelled) => true,
            (JobStatus::Processing, JobStatus::Completed | JobStatus::Failed) => true,
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                to,
            })
        }
    }

    pub fn start(&mut self, total_rows: usize, rows_to_process: usize) -> Result<(), TransitionError> {
        self.guard(JobStatus::Processing)?;
        self.status = JobStatus::Processing;
        self.started_at = Some(Utc::now());
        self.total_rows = total_rows;
        self.rows_to_process = rows_to_process;
        self.processed = 0;
        Ok(())
    }

    /// Count one finished row. Ignored once the job is no longer processing
    /// or every eligible row has already been counted.
    pub fn record(&mut self, outcome: RowOutcome) -> bool {
        if self.status != JobStatus::Processing || self.processed >= self.rows_to_process {
            return false;
        }
        self.processed += 1;
        match outcome {
            RowOutcome::Good => self.good_count += 1,
            RowOutcome::NoFace => self.noface_count += 1,
            RowOutcome::DownloadError => self.download_error_count += 1,
            RowOutcome::SystemError => self.system_error_count += 1,
        }
        true
    }

    pub fn complete(
        &mut self,
        location: Option<PathBuf>,
        message: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.guard(JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        if location.is_some() {
            self.result_location = location;
        }
        self.completed_at = Some(Utc::now());
        self.message = Some(message.into());
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.guard(JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
        Ok(())
    }

    /// Returns `Ok(false)` when the job was already cancelled.
    pub fn cancel(&mut self) -> Result<bool, TransitionError> {
        if self.status == JobStatus::Cancelled {
            return Ok(false);
        }
        self.guard(JobStatus::Cancelled)?;
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        self.message = Some("Cancelled by request".to_string());
        Ok(true)
    }

    /// Sum of the per-outcome counters; always equals `processed`.
    pub fn outcome_total(&self) -> usize {
        self.good_count + self.noface_count + self.download_error_count + self.system_error_count
    }
}
