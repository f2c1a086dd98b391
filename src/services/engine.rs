use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::dataset::{Dataset, DatasetLayout};
use crate::models::job::{Job, JobConfig, JobStatus};
use crate::services::artifacts::ArtifactStore;
use crate::services::checkpoint::{CheckpointWriter, CsvCheckpointWriter};
use crate::services::detector::{FaceDetector, WorkersAiDetector};
use crate::services::fetch::{HttpImageFetcher, ImageFetcher};
use crate::services::registry::{JobRegistry, RegistryError};
use crate::services::scheduler::{RowWorker, Scheduler};

/// Where a job's rows come from.
pub enum DatasetSource {
    /// A CSV file still to be parsed; parse errors fail the job.
    File(PathBuf),
    Loaded(Dataset),
}

/// Entry point for submitting, inspecting and cancelling screening jobs.
pub struct Engine {
    registry: Arc<JobRegistry>,
    scheduler: Arc<Scheduler>,
    artifacts: Arc<ArtifactStore>,
    layout: DatasetLayout,
    upload_dir: PathBuf,
}

impl Engine {
    pub fn new(
        registry: Arc<JobRegistry>,
        scheduler: Arc<Scheduler>,
        artifacts: Arc<ArtifactStore>,
        layout: DatasetLayout,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            scheduler,
            artifacts,
            layout,
            upload_dir: upload_dir.into(),
        }
    }

    /// Wire the production fetcher, detectors and writers from configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, EngineError> {
        let fetcher: Arc<dyn ImageFetcher> =
            Arc::new(HttpImageFetcher::new().map_err(|e| EngineError::Setup(e.to_string()))?);
        let primary: Arc<dyn FaceDetector> = Arc::new(
            WorkersAiDetector::new(
                &config.cf_account_id,
                &config.cf_api_token,
                &config.primary_model,
                &config.detection_label,
            )
            .map_err(|e| EngineError::Setup(e.to_string()))?,
        );
        let fallback: Arc<dyn FaceDetector> = Arc::new(
            WorkersAiDetector::new(
                &config.cf_account_id,
                &config.cf_api_token,
                &config.fallback_model,
                &config.detection_label,
            )
            .map_err(|e| EngineError::Setup(e.to_string()))?,
        );
        let checkpoints: Arc<dyn CheckpointWriter> =
            Arc::new(CsvCheckpointWriter::new(&config.results_dir));

        Ok(Self::assemble(
            fetcher,
            primary,
            fallback,
            checkpoints,
            ArtifactStore::new(&config.no_face_dir),
            config.dataset_layout(),
            &config.upload_dir,
        ))
    }

    /// Build an engine around arbitrary capabilities.
    pub fn assemble(
        fetcher: Arc<dyn ImageFetcher>,
        primary: Arc<dyn FaceDetector>,
        fallback: Arc<dyn FaceDetector>,
        checkpoints: Arc<dyn CheckpointWriter>,
        artifacts: ArtifactStore,
        layout: DatasetLayout,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let artifacts = Arc::new(artifacts);
        let worker = Arc::new(RowWorker::new(fetcher, primary, fallback, Arc::clone(&artifacts)));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&registry), worker, checkpoints));
        Self::new(registry, scheduler, artifacts, layout, upload_dir)
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    /// Persist an uploaded CSV and start processing it in the background.
    pub async fn submit_upload(
        &self,
        original_filename: &str,
        data: &[u8],
        config: JobConfig,
    ) -> Result<Uuid, EngineError> {
        let safe_name = Path::new(original_filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.csv".to_string());

        let job_id = self.registry.submit(config, 0, original_filename);
        let path = self.upload_dir.join(format!("{job_id}_{safe_name}"));
        let saved = async {
            tokio::fs::create_dir_all(&self.upload_dir).await?;
            tokio::fs::write(&path, data).await
        };
        if let Err(e) = saved.await {
            let message = format!("Failed to store upload: {e}");
            self.registry.transition(job_id, |job| {
                job.start(0, 0)?;
                job.fail(message)
            })?;
            return Err(EngineError::Io(e));
        }

        tracing::info!(job_id = %job_id, path = %path.display(), "Dataset uploaded");
        self.spawn(job_id, DatasetSource::File(path));
        Ok(job_id)
    }

    /// Register a job for `source` and start it; the handle resolves when it ends.
    pub fn submit(
        &self,
        source: DatasetSource,
        source_name: impl Into<String>,
        config: JobConfig,
    ) -> (Uuid, JoinHandle<()>) {
        let row_count = match &source {
            DatasetSource::Loaded(dataset) => dataset.len(),
            DatasetSource::File(_) => 0,
        };
        let job_id = self.registry.submit(config, row_count, source_name);
        let handle = self.spawn(job_id, source);
        (job_id, handle)
    }

    fn spawn(&self, job_id: Uuid, source: DatasetSource) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let scheduler = Arc::clone(&self.scheduler);
        let layout = self.layout.clone();

        tokio::spawn(async move {
            metrics::gauge!("face_active_jobs").increment(1.0);
            let dataset = match source {
                DatasetSource::Loaded(dataset) => Ok(dataset),
                DatasetSource::File(path) => {
                    tokio::task::spawn_blocking(move || Dataset::load(&path, &layout))
                        .await
                        .map_err(|e| e.to_string())
                        .and_then(|loaded| loaded.map_err(|e| e.to_string()))
                }
            };

            match dataset {
                Ok(dataset) => {
                    match AssertUnwindSafe(scheduler.run(job_id, dataset))
                        .catch_unwind()
                        .await
                    {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => fail_job(&registry, job_id, format!("Job aborted: {e}")),
                        Err(panic) => fail_job(
                            &registry,
                            job_id,
                            format!("Job aborted: {}", panic_message(panic.as_ref())),
                        ),
                    }
                }
                Err(error) => fail_job(&registry, job_id, error),
            }
            metrics::gauge!("face_active_jobs").decrement(1.0);
        })
    }

    pub fn status(&self, job_id: Uuid) -> Result<Job, EngineError> {
        Ok(self.registry.get(job_id)?)
    }

    pub fn cancel(&self, job_id: Uuid) -> Result<Job, EngineError> {
        Ok(self.registry.cancel(job_id)?)
    }

    /// Location of a completed job's result file.
    pub async fn result_location(&self, job_id: Uuid) -> Result<(Job, PathBuf), EngineError> {
        let job = self.registry.get(job_id)?;
        if job.status != JobStatus::Completed {
            return Err(EngineError::NotReady(job.status));
        }
        let path = job.result_location.clone().ok_or(EngineError::ResultMissing)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(EngineError::ResultMissing);
        }
        Ok((job, path))
    }
}

/// Move a job whose driving task gave up to `failed`. Jobs already in a
/// terminal state (usually cancelled) are left alone.
fn fail_job(registry: &JobRegistry, job_id: Uuid, error: String) {
    tracing::error!(job_id = %job_id, error = %error, "Job failed");
    let failed = registry.transition(job_id, |job| {
        if job.status == JobStatus::Queued {
            job.start(0, 0)?;
        }
        job.fail(error)
    });
    match failed {
        Ok(_) => {
            metrics::counter!("face_jobs_finished_total", "status" => "failed").increment(1);
        }
        Err(RegistryError::Conflict(e)) => {
            tracing::info!(job_id = %job_id, reason = %e, "Job already finished");
        }
        Err(e) => tracing::error!(job_id = %job_id, error = %e, "Could not mark job failed"),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Job not completed yet (status: {0})")]
    NotReady(JobStatus),

    #[error("Result file not found")]
    ResultMissing,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine setup failed: {0}")]
    Setup(String),
}
