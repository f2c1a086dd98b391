use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::app_state::AppState;
use crate::services::artifacts::ArtifactError;
use crate::services::engine::EngineError;
use crate::services::registry::RegistryError;

pub mod health;
pub mod jobs;

/// API routes without the tower-http layers the server adds on top.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::prometheus_metrics))
        .route("/api/upload", post(jobs::upload_dataset))
        .route("/api/status/{job_id}", get(jobs::get_job_status))
        .route("/api/cancel/{job_id}", post(jobs::cancel_job))
        .route("/api/download/{job_id}", get(jobs::download_results))
        .route("/api/download-noface/{job_id}", get(jobs::download_noface_images))
        .route("/api/jobs", get(jobs::list_jobs))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Errors surfaced to HTTP callers as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Registry(RegistryError::NotFound(_)) => {
                ApiError::NotFound("Job not found".to_string())
            }
            EngineError::Registry(RegistryError::Conflict(e)) => ApiError::Conflict(e.to_string()),
            EngineError::NotReady(_) => ApiError::BadRequest("Job not completed yet".to_string()),
            EngineError::ResultMissing => ApiError::NotFound("Result file not found".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ArtifactError> for ApiError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NotFound => ApiError::NotFound("No images found".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
