use axum::extract::{Multipart, Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::IntoResponse;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{JobOptions, JobStatusResponse, UploadResponse};
use crate::models::job::Job;
use crate::routes::ApiError;

/// Identifiers that are not UUIDs cannot name a job.
fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound("Job not found".into()))
}

/// POST /api/upload — Upload a CSV and start screening it.
pub async fn upload_dataset(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut options = JobOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                upload = Some((filename, data.to_vec()));
            }
            "options" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                options = serde_json::from_slice(&data)
                    .map_err(|e| ApiError::BadRequest(format!("Invalid options: {e}")))?;
            }
            _ => {}
        }
    }

    let (filename, data) = upload.ok_or_else(|| ApiError::BadRequest("No file provided".into()))?;
    if filename.is_empty() {
        return Err(ApiError::BadRequest("No file selected".into()));
    }
    if !filename.to_ascii_lowercase().ends_with(".csv") {
        return Err(ApiError::BadRequest("Only CSV files are allowed".into()));
    }

    let config = options.apply(state.config.job_defaults());
    config
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("Invalid options: {e}")))?;

    let job_id = state.engine.submit_upload(&filename, &data, config).await?;

    Ok(Json(UploadResponse {
        job_id,
        message: "File uploaded successfully. Processing started.".to_string(),
    }))
}

/// GET /api/status/{job_id} — Job snapshot with progress percentage.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.engine.status(parse_job_id(&job_id)?)?;
    Ok(Json(job.into()))
}

/// POST /api/cancel/{job_id} — Stop a queued or running job.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.engine.cancel(parse_job_id(&job_id)?)?;
    Ok(Json(job.into()))
}

/// GET /api/download/{job_id} — Annotated CSV of a completed job.
pub async fn download_results(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (job, path) = state.engine.result_location(parse_job_id(&job_id)?).await?;
    let body = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::NotFound("Result file not found".into()))?;

    Ok((
        [
            (CONTENT_TYPE, "text/csv".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"processed_{}\"", job.original_filename),
            ),
        ],
        body,
    ))
}

/// GET /api/download-noface/{job_id} — ZIP of the images with no face found.
pub async fn download_noface_images(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let archive = state.engine.artifacts().bundle(job_id).await?;

    Ok((
        [
            (CONTENT_TYPE, "application/zip".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"noface_images_{job_id}.zip\""),
            ),
        ],
        archive,
    ))
}

/// GET /api/jobs — Every job known to this process.
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<Job>> {
    Json(state.engine.registry().list())
}
