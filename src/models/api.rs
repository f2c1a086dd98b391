use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{Job, JobConfig};

/// Optional per-upload overrides, sent as the JSON `options` multipart field.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobOptions {
    pub concurrency: Option<usize>,
    pub download_timeout_secs: Option<u64>,
    pub primary_threshold: Option<f32>,
    pub fallback_threshold: Option<f32>,
    pub checkpoint_interval: Option<usize>,
    pub persist_artifacts: Option<bool>,
}

impl JobOptions {
    pub fn apply(self, base: JobConfig) -> JobConfig {
        JobConfig {
            concurrency: self.concurrency.unwrap_or(base.concurrency),
            download_timeout_secs: self
                .download_timeout_secs
                .unwrap_or(base.download_timeout_secs),
            primary_threshold: self.primary_threshold.unwrap_or(base.primary_threshold),
            fallback_threshold: self.fallback_threshold.unwrap_or(base.fallback_threshold),
            checkpoint_interval: self.checkpoint_interval.unwrap_or(base.checkpoint_interval),
            persist_artifacts: self.persist_artifacts.unwrap_or(base.persist_artifacts),
        }
    }
}

/// Response after uploading a dataset.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub job_id: Uuid,
    pub message: String,
}

/// Job snapshot plus derived progress percentage.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    #[serde(flatten)]
    pub job: Job,
    pub progress: f64,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        let progress = job.progress();
        Self { job, progress }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_override_only_given_fields() {
        let options: JobOptions =
            serde_json::from_str(r#"{"concurrency": 2, "persist_artifacts": false}"#).unwrap();
        let config = options.apply(JobConfig::default());
        assert_eq!(config.concurrency, 2);
        assert!(!config.persist_artifacts);
        assert_eq!(config.checkpoint_interval, 50);
        assert_eq!(config.primary_threshold, 0.80);
    }

    #[test]
    fn test_unknown_option_is_rejected() {
        let parsed = serde_json::from_str::<JobOptions>(r#"{"threads": 4}"#);
        assert!(parsed.is_err());
    }
}
