use async_trait::async_trait;
use std::path::PathBuf;
use uuid::Uuid;

use crate::models::dataset::{Dataset, DatasetError};

/// Durable sink for a job's (partially) annotated dataset.
///
/// Each call replaces whatever the previous call wrote. Calls for one job
/// come only from that job's scheduler, one at a time.
#[async_trait]
pub trait CheckpointWriter: Send + Sync {
    async fn write(&self, job_id: Uuid, dataset: &Dataset) -> Result<PathBuf, CheckpointError>;
}

/// Writes `<results_dir>/<job_id>_results.csv`.
pub struct CsvCheckpointWriter {
    results_dir: PathBuf,
}

impl CsvCheckpointWriter {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    pub fn location(&self, job_id: Uuid) -> PathBuf {
        self.results_dir.join(format!("{job_id}_results.csv"))
    }
}

#[async_trait]
impl CheckpointWriter for CsvCheckpointWriter {
    async fn write(&self, job_id: Uuid, dataset: &Dataset) -> Result<PathBuf, CheckpointError> {
        let bytes = dataset.to_csv_bytes()?;
        let path = self.location(job_id);
        tokio::fs::create_dir_all(&self.results_dir).await?;
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Failed to serialize dataset: {0}")]
    Serialize(#[from] DatasetError),

    #[error("Failed to write checkpoint: {0}")]
    Io(#[from] std::io::Error),
}
