//! HTTP surface for the ingestion service.
//!
//! - `POST /upload` – multipart form with `tenant_name` and `file`. Runs the pipeline and returns
//!   the stored record's id, summary and file path.
//! - `GET /metrics` – ingestion counters, with failures broken down by stage.
//! - `GET /health` – registry and workspace store reachability; `503` when either is down.
//!
//! Validation problems answer `400` (`413` for oversized files) before anything is written.
//! Pipeline failures answer `500` with `{error: <stage>, message}`.

use crate::metrics::MetricsSnapshot;
use crate::pipeline::{IngestApi, PipelineError, UploadForm, ValidationError};
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::{Field, MultipartError},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Room for multipart boundaries, headers and the tenant field on top of the file itself.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build the HTTP router exposing the ingestion API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: IngestApi + 'static,
{
    let body_limit = service.upload_limit().saturating_add(FORM_OVERHEAD_BYTES);
    Router::new()
        .route("/upload", post(upload::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/health", get(get_health::<S>))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(service)
}

/// Success response for `POST /upload`.
#[derive(Serialize)]
struct UploadResponse {
    status: &'static str,
    message: &'static str,
    tenant: String,
    tenant_created: bool,
    record_id: String,
    file_path: String,
    summary: String,
    truncated: bool,
}

/// Accept an uploaded document, summarize it and store it for the tenant.
async fn upload<S>(
    State(service): State<Arc<S>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError>
where
    S: IngestApi,
{
    let limit = service.upload_limit();
    let form = read_form(&mut multipart, limit).await?;
    let upload = form.validate(limit)?;
    let receipt = service.ingest(upload).await?;
    tracing::info!(
        tenant = %receipt.tenant,
        record_id = %receipt.record_id,
        tenant_created = receipt.tenant_created,
        "Upload request completed"
    );

    Ok(Json(UploadResponse {
        status: "ok",
        message: "File processed and summary stored",
        tenant: receipt.tenant,
        tenant_created: receipt.tenant_created,
        record_id: receipt.record_id,
        file_path: receipt.file_path,
        summary: receipt.summary,
        truncated: receipt.truncated,
    }))
}

async fn read_form(multipart: &mut Multipart, limit: usize) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("tenant_name") => form.tenant_name = Some(field.text().await?),
            Some("file") => {
                form.file_name = field.file_name().map(str::to_string);
                form.bytes = Some(read_capped(field, limit).await?);
            }
            _ => {}
        }
    }
    Ok(form)
}

/// Buffer a field, refusing as soon as it grows past `limit`.
async fn read_capped(mut field: Field<'_>, limit: usize) -> Result<Vec<u8>, AppError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.chunk().await? {
        if bytes.len() + chunk.len() > limit {
            return Err(ValidationError::FileTooLarge { limit }.into());
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// Return ingestion counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: IngestApi,
{
    Json(service.metrics_snapshot())
}

/// Report store reachability.
async fn get_health<S>(State(service): State<Arc<S>>) -> Response
where
    S: IngestApi,
{
    let report = service.health().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

enum AppError {
    Validation(ValidationError),
    Multipart(MultipartError),
    Pipeline(PipelineError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            Self::Validation(inner) => {
                let status = match inner {
                    ValidationError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                    _ => StatusCode::BAD_REQUEST,
                };
                (status, "validation", inner.to_string())
            }
            Self::Multipart(inner) => (inner.status(), "validation", inner.body_text()),
            Self::Pipeline(inner) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                inner.stage().as_str(),
                inner.to_string(),
            ),
        };
        (status, Json(json!({ "error": error, "message": message }))).into_response()
    }
}

impl From<ValidationError> for AppError {
    fn from(inner: ValidationError) -> Self {
        Self::Validation(inner)
    }
}

impl From<MultipartError> for AppError {
    fn from(inner: MultipartError) -> Self {
        Self::Multipart(inner)
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        Self::Pipeline(inner)
    }
}
