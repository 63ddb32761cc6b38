//! Handlers for the `/jobs` resource.
//!
//! Every endpoint maps directly onto a store or engine operation; the
//! handlers themselves hold no orchestration logic.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use meshport_core::naming::sanitize_filename;
use meshport_core::{JobStatus, JobUpdate};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Default page size for job listing.
const DEFAULT_LIMIT: usize = 20;

/// Media type of the final artifact.
const USDZ_MEDIA_TYPE: &str = "model/vnd.usdz+zip";

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// Typed response for the job creation endpoint.
#[derive(Debug, Serialize)]
pub struct CreatedJob {
    pub job_id: String,
}

/// POST /api/jobs
///
/// Multipart upload of one `.ifc` file in a field named `file`. Creates
/// the job record, stores the input into the job's work directory, and
/// submits it to the engine. Returns 201 with the new job id.
pub async fn create_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .ok_or_else(|| AppError::BadRequest("Filename is missing".to_string()))?
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        upload = Some((filename, data));
        break;
    }

    let Some((filename, data)) = upload else {
        return Err(AppError::BadRequest(
            "Multipart field 'file' is missing".to_string(),
        ));
    };

    let filename = sanitize_filename(&filename, "model.ifc");
    let extension = std::path::Path::new(&filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    if extension.as_deref() != Some("ifc") {
        return Err(AppError::BadRequest(
            "Only .ifc files are supported".to_string(),
        ));
    }

    if data.is_empty() {
        return Err(AppError::BadRequest("Uploaded file is empty".to_string()));
    }
    if data.len() > state.config.max_upload_bytes() {
        return Err(AppError::PayloadTooLarge(format!(
            "File is too large. Limit is {} MB",
            state.config.max_upload_mb
        )));
    }

    let store = state.engine.store();
    let record = store.create_job()?;
    let record = store.update_job(
        &record.id,
        JobUpdate {
            input_name: Some(filename.clone()),
            ..JobUpdate::default()
        },
    )?;

    tokio::fs::write(store.input_path(&record), &data)
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to store upload: {e}")))?;
    store.append_log(
        &record.id,
        &format!("Uploaded {filename}, size={} bytes", data.len()),
    );

    state.engine.submit(&record.id);

    tracing::info!(job_id = %record.id, input = %filename, "Job submitted");

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: CreatedJob { job_id: record.id },
        }),
    ))
}

// ---------------------------------------------------------------------------
// List / get
// ---------------------------------------------------------------------------

/// Query parameters for the listing endpoint.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

/// GET /api/jobs
///
/// Jobs ordered by `updated_at` descending, capped at `limit`
/// (default 20).
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> AppResult<impl IntoResponse> {
    let jobs = state
        .engine
        .store()
        .list_jobs(params.limit.unwrap_or(DEFAULT_LIMIT));
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let record = state.engine.store().get_job(&job_id)?;
    Ok(Json(DataResponse { data: record }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/jobs/{id}/cancel
///
/// Request cooperative cancellation. A job still waiting for a worker is
/// finalized immediately; a running job keeps executing until its
/// pipeline observes the flag. Returns the updated record.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let record = state.engine.request_cancel(&job_id)?;
    tracing::info!(job_id = %job_id, status = %record.status, "Cancellation requested");
    Ok(Json(DataResponse { data: record }))
}

// ---------------------------------------------------------------------------
// Artifact / log downloads
// ---------------------------------------------------------------------------

/// GET /api/jobs/{id}/download
///
/// The final USDZ artifact. 409 unless the job is `done`.
pub async fn download_output(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let record = state.engine.store().get_job(&job_id)?;

    if record.status != JobStatus::Done || record.output_name.is_none() {
        return Err(AppError::Conflict("Job is not completed".to_string()));
    }

    let output_path = state.engine.store().final_output_path(&record);
    let bytes = tokio::fs::read(&output_path)
        .await
        .map_err(|_| AppError::NotFound("Output file not found".to_string()))?;

    Ok(attachment_response(
        bytes,
        USDZ_MEDIA_TYPE,
        record.output_name.as_deref().unwrap_or("model.usdz"),
    ))
}

/// GET /api/jobs/{id}/logs
///
/// The job's append-only log file.
pub async fn download_logs(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let record = state.engine.store().get_job(&job_id)?;

    let log_path = state.engine.store().log_path(&record);
    let bytes = tokio::fs::read(&log_path)
        .await
        .map_err(|_| AppError::NotFound("Log file not found".to_string()))?;

    Ok(attachment_response(
        bytes,
        "text/plain; charset=utf-8",
        &format!("{job_id}.log"),
    ))
}

fn attachment_response(bytes: Vec<u8>, media_type: &str, filename: &str) -> impl IntoResponse {
    (
        [
            (CONTENT_TYPE, media_type.to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
}
