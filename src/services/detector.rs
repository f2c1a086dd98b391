use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;

use crate::services::fetch::FetchedImage;

/// Decides whether an image contains a face at the given confidence.
///
/// Called concurrently from every worker of every job, so implementations
/// must not keep per-call mutable state.
#[async_trait]
pub trait FaceDetector: Send + Sync {
    async fn detect(&self, image: &FetchedImage, threshold: f32) -> Result<bool, DetectError>;
}

/// Client for a Cloudflare Workers AI object-detection model.
pub struct WorkersAiDetector {
    http: Client,
    account_id: String,
    api_token: String,
    model: String,
    label: String,
}

#[derive(Deserialize)]
struct DetectionResponse {
    result: Vec<Detection>,
}

#[derive(Deserialize)]
struct Detection {
    label: String,
    score: f32,
}

impl WorkersAiDetector {
    pub fn new(
        account_id: &str,
        api_token: &str,
        model: &str,
        label: &str,
    ) -> Result<Self, DetectError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;

        Ok(Self {
            http,
            account_id: account_id.to_string(),
            api_token: api_token.to_string(),
            model: model.to_string(),
            label: label.to_string(),
        })
    }

    fn matches(&self, detections: &[Detection], threshold: f32) -> bool {
        detections
            .iter()
            .any(|d| d.label.eq_ignore_ascii_case(&self.label) && d.score >= threshold)
    }
}

#[async_trait]
impl FaceDetector for WorkersAiDetector {
    async fn detect(&self, image: &FetchedImage, threshold: f32) -> Result<bool, DetectError> {
        let url = format!(
            "https://api.cloudflare.com/client/v4/accounts/{}/ai/run/{}",
            self.account_id, self.model
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(image.bytes.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DetectError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: DetectionResponse = response.json().await?;
        Ok(self.matches(&parsed.result, threshold))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Workers AI returned {status}: {body}")]
    Api { status: u16, body: String },
}
