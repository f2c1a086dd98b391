//! Batch scheduler: drives one job's eligible rows through a bounded pool of
//! row workers, applying results by row index as they complete.
//!
//! Cancellation is cooperative. Once the job's token fires the scheduler stops
//! dispatching, drops whatever is still in flight and writes one last partial
//! checkpoint. A row that finishes in the gap between that write and the loop
//! exiting is lost from the persisted file; that is accepted.

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{Id as TaskId, JoinError, JoinSet};
use uuid::Uuid;

use crate::models::dataset::{Dataset, RowOutcome, RowTask};
use crate::models::job::{Job, JobConfig, JobStatus};
use crate::services::artifacts::ArtifactStore;
use crate::services::checkpoint::CheckpointWriter;
use crate::services::detector::{DetectError, FaceDetector};
use crate::services::fetch::{FetchedImage, ImageFetcher};
use crate::services::registry::{JobRegistry, RegistryError};

/// What a worker hands back for one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowResult {
    pub index: usize,
    pub outcome: RowOutcome,
    pub note: Option<String>,
}

impl RowResult {
    fn new(index: usize, outcome: RowOutcome, note: Option<String>) -> Self {
        Self {
            index,
            outcome,
            note,
        }
    }
}

/// Fetches and classifies a single row. Never fails: every fault becomes an outcome.
pub struct RowWorker {
    fetcher: Arc<dyn ImageFetcher>,
    primary: Arc<dyn FaceDetector>,
    fallback: Arc<dyn FaceDetector>,
    artifacts: Arc<ArtifactStore>,
}

impl RowWorker {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        primary: Arc<dyn FaceDetector>,
        fallback: Arc<dyn FaceDetector>,
        artifacts: Arc<ArtifactStore>,
    ) -> Self {
        Self {
            fetcher,
            primary,
            fallback,
            artifacts,
        }
    }

    pub async fn run(&self, job_id: Uuid, task: RowTask, config: &JobConfig) -> RowResult {
        let index = task.index;
        match AssertUnwindSafe(self.process(job_id, &task, config))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => RowResult::new(
                index,
                RowOutcome::SystemError,
                Some("row task panicked".to_string()),
            ),
        }
    }

    async fn process(&self, job_id: Uuid, task: &RowTask, config: &JobConfig) -> RowResult {
        let image = match self
            .fetcher
            .fetch(&task.reference, config.download_timeout())
            .await
        {
            Ok(image) => image,
            Err(e) => {
                return RowResult::new(task.index, RowOutcome::DownloadError, Some(e.to_string()))
            }
        };

        match self.detect(&image, config).await {
            Ok(true) => RowResult::new(task.index, RowOutcome::Good, None),
            Ok(false) => self.no_face(job_id, task, &image, config).await,
            Err(e) => RowResult::new(task.index, RowOutcome::SystemError, Some(e.to_string())),
        }
    }

    /// The fallback model is consulted only when the primary finds nothing.
    async fn detect(&self, image: &FetchedImage, config: &JobConfig) -> Result<bool, DetectError> {
        if self.primary.detect(image, config.primary_threshold).await? {
            return Ok(true);
        }
        self.fallback.detect(image, config.fallback_threshold).await
    }

    async fn no_face(
        &self,
        job_id: Uuid,
        task: &RowTask,
        image: &FetchedImage,
        config: &JobConfig,
    ) -> RowResult {
        if !config.persist_artifacts {
            return RowResult::new(
                task.index,
                RowOutcome::NoFace,
                Some("image not saved (disabled by configuration)".to_string()),
            );
        }
        match self.artifacts.save(job_id, &task.row_id, image).await {
            Ok(path) => RowResult::new(
                task.index,
                RowOutcome::NoFace,
                Some(format!("Saved: {}", path.display())),
            ),
            Err(e) => RowResult::new(task.index, RowOutcome::SystemError, Some(e.to_string())),
        }
    }
}

/// Resolve a joined row task to its result. A task that died without
/// reporting counts as a system error for the row it was dispatched for.
fn settle(
    joined: Result<(TaskId, (RowResult, f64)), JoinError>,
    rows: &mut HashMap<TaskId, usize>,
) -> Option<(RowResult, f64)> {
    match joined {
        Ok((id, done)) => {
            rows.remove(&id);
            Some(done)
        }
        Err(e) => {
            let index = rows.remove(&e.id())?;
            Some((
                RowResult::new(index, RowOutcome::SystemError, Some(format!("row task failed: {e}"))),
                0.0,
            ))
        }
    }
}

enum LoopEnd {
    Exhausted,
    Cancelled,
}

/// Runs jobs. One `run` call per job; the dataset never leaves that call.
pub struct Scheduler {
    registry: Arc<JobRegistry>,
    worker: Arc<RowWorker>,
    checkpoints: Arc<dyn CheckpointWriter>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<JobRegistry>,
        worker: Arc<RowWorker>,
        checkpoints: Arc<dyn CheckpointWriter>,
    ) -> Self {
        Self {
            registry,
            worker,
            checkpoints,
        }
    }

    /// Process every eligible row of `dataset` and return the final job snapshot.
    pub async fn run(&self, job_id: Uuid, mut dataset: Dataset) -> Result<Job, RegistryError> {
        let config = Arc::new(self.registry.get(job_id)?.config);
        let cancel = self.registry.cancellation_token(job_id)?;
        let tasks = dataset.row_tasks();

        match self
            .registry
            .transition(job_id, |job| job.start(dataset.len(), tasks.len()))
        {
            Ok(_) => {}
            Err(RegistryError::Conflict(e)) => {
                // Cancelled while still queued.
                tracing::info!(job_id = %job_id, reason = %e, "Job not started");
                return self.registry.get(job_id);
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            job_id = %job_id,
            total_rows = dataset.len(),
            rows_to_process = tasks.len(),
            concurrency = config.concurrency,
            "Job started"
        );

        if tasks.is_empty() {
            let location = self.checkpoint(job_id, &dataset).await;
            let job = match self
                .registry
                .transition(job_id, |job| job.complete(location, "nothing to process"))
            {
                Err(RegistryError::Conflict(_)) => self.registry.get(job_id)?,
                other => other?,
            };
            metrics::counter!("face_jobs_finished_total", "status" => job.status.to_string())
                .increment(1);
            return Ok(job);
        }

        let started = Instant::now();
        let mut pending = tasks.into_iter();
        let mut in_flight = JoinSet::new();
        let mut rows = HashMap::new();
        for task in pending.by_ref().take(config.concurrency.max(1)) {
            self.dispatch(&mut in_flight, &mut rows, job_id, task, &config);
        }

        let mut completed = 0usize;
        let end = loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => break LoopEnd::Cancelled,
                joined = in_flight.join_next_with_id() => joined,
            };
            let Some(joined) = joined else {
                break LoopEnd::Exhausted;
            };
            let Some((result, elapsed)) = settle(joined, &mut rows) else {
                tracing::error!(job_id = %job_id, "Row task ended without a known row");
                if let Some(task) = pending.next() {
                    self.dispatch(&mut in_flight, &mut rows, job_id, task, &config);
                }
                continue;
            };

            dataset.set_outcome(result.index, result.outcome);
            let status = self.registry.update(job_id, |job| {
                job.record(result.outcome);
                job.status
            })?;
            completed += 1;

            metrics::counter!("face_rows_processed_total", "outcome" => result.outcome.as_ref().to_string())
                .increment(1);
            metrics::histogram!("face_row_seconds").record(elapsed);
            match result.outcome {
                RowOutcome::SystemError => tracing::warn!(
                    job_id = %job_id,
                    row = result.index,
                    note = result.note.as_deref().unwrap_or_default(),
                    "Row failed"
                ),
                outcome => tracing::debug!(
                    job_id = %job_id,
                    row = result.index,
                    outcome = %outcome,
                    note = result.note.as_deref().unwrap_or_default(),
                    "Row finished"
                ),
            }

            if status == JobStatus::Cancelled || cancel.is_cancelled() {
                break LoopEnd::Cancelled;
            }

            let remaining = !in_flight.is_empty() || pending.len() > 0;
            if remaining && completed % config.checkpoint_interval.max(1) == 0 {
                if let Some(location) = self.checkpoint(job_id, &dataset).await {
                    self.registry
                        .update(job_id, |job| job.result_location = Some(location))?;
                }
            }

            if let Some(task) = pending.next() {
                self.dispatch(&mut in_flight, &mut rows, job_id, task, &config);
            }
        };

        match end {
            LoopEnd::Cancelled => {
                in_flight.abort_all();
                tracing::info!(job_id = %job_id, completed, "Stopping cancelled job");
                if let Some(location) = self.checkpoint(job_id, &dataset).await {
                    self.registry
                        .update(job_id, |job| job.result_location = Some(location))?;
                }
                metrics::counter!("face_jobs_finished_total", "status" => "cancelled").increment(1);
                self.registry.get(job_id)
            }
            LoopEnd::Exhausted => {
                let job = match self.checkpoints.write(job_id, &dataset).await {
                    Ok(location) => self.registry.transition(job_id, |job| {
                        job.complete(Some(location), "Processing completed successfully")
                    }),
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "Failed to write results");
                        self.registry.transition(job_id, |job| {
                            job.fail(format!("Failed to write results: {e}"))
                        })
                    }
                };
                // A cancel that lands after the last row leaves the job cancelled.
                let job = match job {
                    Err(RegistryError::Conflict(_)) => self.registry.get(job_id)?,
                    other => other?,
                };
                tracing::info!(
                    job_id = %job_id,
                    status = %job.status,
                    good = job.good_count,
                    no_face = job.noface_count,
                    download_errors = job.download_error_count,
                    system_errors = job.system_error_count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job finished"
                );
                metrics::counter!("face_jobs_finished_total", "status" => job.status.to_string())
                    .increment(1);
                Ok(job)
            }
        }
    }

    fn dispatch(
        &self,
        in_flight: &mut JoinSet<(RowResult, f64)>,
        rows: &mut HashMap<TaskId, usize>,
        job_id: Uuid,
        task: RowTask,
        config: &Arc<JobConfig>,
    ) {
        let worker = Arc::clone(&self.worker);
        let config = Arc::clone(config);
        let index = task.index;
        let handle = in_flight.spawn(async move {
            let start = Instant::now();
            let result = worker.run(job_id, task, &config).await;
            (result, start.elapsed().as_secs_f64())
        });
        rows.insert(handle.id(), index);
    }

    /// Best-effort partial write; failures are logged and retried at the next interval.
    async fn checkpoint(&self, job_id: Uuid, dataset: &Dataset) -> Option<PathBuf> {
        match self.checkpoints.write(job_id, dataset).await {
            Ok(location) => {
                tracing::debug!(
                    job_id = %job_id,
                    location = %location.display(),
                    resolved = dataset.resolved_count(),
                    "Checkpoint written"
                );
                Some(location)
            }
            Err(e) => {
                metrics::counter!("face_checkpoint_failures_total").increment(1);
                tracing::warn!(job_id = %job_id, error = %e, "Checkpoint failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_settle_maps_aborted_task_to_system_error() {
        let mut in_flight: JoinSet<(RowResult, f64)> = JoinSet::new();
        let mut rows = HashMap::new();
        let handle = in_flight.spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            (RowResult::new(7, RowOutcome::Good, None), 0.0)
        });
        rows.insert(handle.id(), 7);
        handle.abort();

        let joined = in_flight.join_next_with_id().await.unwrap();
        let (result, _) = settle(joined, &mut rows).unwrap();

        assert_eq!(result.index, 7);
        assert_eq!(result.outcome, RowOutcome::SystemError);
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_settle_passes_through_finished_rows() {
        let mut in_flight = JoinSet::new();
        let mut rows = HashMap::new();
        let handle =
            in_flight.spawn(async { (RowResult::new(3, RowOutcome::Good, None), 0.5) });
        rows.insert(handle.id(), 3);

        let joined = in_flight.join_next_with_id().await.unwrap();
        let (result, elapsed) = settle(joined, &mut rows).unwrap();

        assert_eq!(result, RowResult::new(3, RowOutcome::Good, None));
        assert_eq!(elapsed, 0.5);
        assert!(rows.is_empty());
    }
}
