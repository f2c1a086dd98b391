use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::dataset::DatasetLayout;
use crate::models::job::JobConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:5000"). Unused by the batch binary.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Where uploaded datasets are stored before processing
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Where checkpoint and final result CSVs are written
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Where images with no detected face are persisted, one folder per job
    #[serde(default = "default_no_face_dir")]
    pub no_face_dir: PathBuf,

    /// Cloudflare account ID
    pub cf_account_id: String,

    /// Cloudflare Workers AI API token
    pub cf_api_token: String,

    /// Workers AI model consulted first for every image
    #[serde(default = "default_model")]
    pub primary_model: String,

    /// Workers AI model consulted only when the primary finds nothing
    #[serde(default = "default_model")]
    pub fallback_model: String,

    /// Detection label that counts as a face
    #[serde(default = "default_detection_label")]
    pub detection_label: String,

    #[serde(default = "default_url_column")]
    pub url_column: String,

    #[serde(default = "default_status_column")]
    pub status_column: String,

    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Default worker pool width per job
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    #[serde(default = "default_primary_threshold")]
    pub primary_threshold: f32,

    #[serde(default = "default_fallback_threshold")]
    pub fallback_threshold: f32,

    /// Completed rows between partial result writes
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,

    #[serde(default = "default_persist_artifacts")]
    pub persist_artifacts: bool,

    /// Artifacts older than this are removed by the retention sweeper
    #[serde(default = "default_retention_ttl_secs")]
    pub retention_ttl_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_no_face_dir() -> PathBuf {
    PathBuf::from("no_face_images")
}

fn default_model() -> String {
    "@cf/facebook/detr-resnet-50".to_string()
}

fn default_detection_label() -> String {
    "person".to_string()
}

fn default_url_column() -> String {
    "Check-In Photo".to_string()
}

fn default_status_column() -> String {
    "Face_Status".to_string()
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_concurrency() -> usize {
    6
}

fn default_download_timeout_secs() -> u64 {
    20
}

fn default_primary_threshold() -> f32 {
    0.80
}

fn default_fallback_threshold() -> f32 {
    0.70
}

fn default_checkpoint_interval() -> usize {
    50
}

fn default_persist_artifacts() -> bool {
    true
}

fn default_retention_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60 * 60
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Per-job tunables seeded from the process-wide defaults.
    pub fn job_defaults(&self) -> JobConfig {
        JobConfig {
            concurrency: self.concurrency,
            download_timeout_secs: self.download_timeout_secs,
            primary_threshold: self.primary_threshold,
            fallback_threshold: self.fallback_threshold,
            checkpoint_interval: self.checkpoint_interval,
            persist_artifacts: self.persist_artifacts,
        }
    }

    pub fn dataset_layout(&self) -> DatasetLayout {
        DatasetLayout {
            url_column: self.url_column.clone(),
            status_column: self.status_column.clone(),
            id_column: self.id_column.clone(),
        }
    }

    /// Directories owned by the service and swept for stale artifacts.
    pub fn managed_roots(&self) -> Vec<PathBuf> {
        vec![
            self.upload_dir.clone(),
            self.results_dir.clone(),
            self.no_face_dir.clone(),
        ]
    }

    pub fn retention_ttl(&self) -> Duration {
        Duration::from_secs(self.retention_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
