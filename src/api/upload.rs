//! Upload, ingestion status and job lookup handlers.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use uuid::Uuid;

use crate::jobs::IngestJob;
use crate::rag::{looks_like_pdf, status_text};

use super::routes::AppState;
use super::types::{ApiError, StatusResponse, UploadQuery, UploadResponse};

/// Accept a PDF in the multipart field `file` and ingest it.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let mut file: Option<(String, Bytes)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::warn!(error = %e, "Malformed multipart body");
        ApiError::bad_request("รูปแบบไฟล์ที่อัปโหลดไม่ถูกต้อง")
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("document.pdf").to_string();
        let data = field.bytes().await.map_err(|e| {
            tracing::warn!(error = %e, "Failed to read uploaded file");
            ApiError::bad_request("ไม่สามารถอ่านไฟล์ที่อัปโหลดได้")
        })?;
        file = Some((filename, data));
        break;
    }

    let (filename, data) =
        file.ok_or_else(|| ApiError::bad_request("ไม่พบไฟล์ในคำขอ กรุณาแนบไฟล์ PDF"))?;
    submit_upload(&state, filename, data, query.wait).await
}

/// Validate an upload, register a job and run the ingestion on its own task.
/// With `wait` the response carries the status text; otherwise it returns
/// `202` at once. The task outlives a dropped request, so the job always
/// reaches a final state.
pub(crate) async fn submit_upload(
    state: &Arc<AppState>,
    filename: String,
    data: Bytes,
    wait: bool,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    if data.is_empty() {
        return Err(ApiError::bad_request("ไฟล์ที่อัปโหลดว่างเปล่า"));
    }
    if !looks_like_pdf(&data) {
        return Err(ApiError::bad_request("รองรับเฉพาะไฟล์ PDF เท่านั้น"));
    }

    let job_id = state.jobs.create(&filename).await.id;
    tracing::info!(%job_id, %filename, bytes = data.len(), wait, "Upload accepted");

    let background = Arc::clone(state);
    let task =
        tokio::spawn(async move { run_ingestion(&background, job_id, &filename, &data).await });

    if wait {
        let message = task.await.map_err(|e| {
            tracing::error!(%job_id, error = %e, "Ingestion task aborted");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "เกิดข้อผิดพลาดระหว่างประมวลผลเอกสาร",
            )
        })?;
        return Ok((
            StatusCode::OK,
            Json(UploadResponse {
                message,
                job_id,
            }),
        ));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            message: format!("กำลังประมวลผลเอกสาร ตรวจสอบสถานะได้ที่ /jobs/{}", job_id),
            job_id,
        }),
    ))
}

async fn run_ingestion(state: &AppState, job_id: Uuid, filename: &str, data: &[u8]) -> String {
    let result = state.ingestor.ingest(filename, data).await;
    if let Err(e) = &result {
        tracing::error!(%job_id, %filename, error = %e, "Ingestion failed");
    }
    state.jobs.finish(job_id, &result).await;
    status_text(&result)
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: state.jobs.status().await,
    })
}

/// Clear finished jobs; running ones are kept.
pub async fn reset_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let removed = state.jobs.reset().await;
    tracing::debug!(removed, "Upload status reset");
    Json(StatusResponse {
        status: state.jobs.status().await,
    })
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<IngestJob>, ApiError> {
    state
        .jobs
        .get(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("ไม่พบงานอัปโหลดที่ระบุ"))
}
