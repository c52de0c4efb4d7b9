//! HTTP front end: multipart upload in, zip of structured JSON files out.
//!
//! ```text
//! POST /upload-invoices/   multipart field `files` (repeatable)
//!   200 application/zip    Content-Disposition + X-Failed-Documents
//!   400 {"error": ...}     no files, or an unreadable part
//!   500 {"error": ...}     batch-fatal error (schema missing, write failure, ...)
//! GET  /health             "ok"
//! ```
//!
//! The output directories are shared by every request, so batches run one
//! at a time behind an async mutex, held until the archive bytes are read.

use crate::batch::InvoicePipeline;
use crate::error::InvoiceError;
use crate::output::Document;
use crate::pipeline::input::sanitize_filename;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

/// Multipart field carrying the PDFs.
pub const FILES_FIELD: &str = "files";

const FAILED_DOCUMENTS_HEADER: &str = "x-failed-documents";

#[derive(Clone)]
struct AppState {
    pipeline: Arc<InvoicePipeline>,
    batch_lock: Arc<Mutex<()>>,
}

/// Build the router. The upload body limit comes from
/// [`crate::config::PipelineConfig::max_upload_bytes`].
pub fn router(pipeline: Arc<InvoicePipeline>) -> Router {
    let body_limit = pipeline.config().max_upload_bytes;
    let state = AppState {
        pipeline,
        batch_lock: Arc::new(Mutex::new(())),
    };

    Router::new()
        .route("/upload-invoices/", post(upload_invoices))
        .route("/health", get(|| async { "ok" }))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(pipeline: Arc<InvoicePipeline>, addr: SocketAddr) -> Result<(), InvoiceError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| InvoiceError::InvalidConfig(format!("cannot bind {addr}: {e}")))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, router(pipeline))
        .await
        .map_err(|e| InvoiceError::Internal(format!("server error: {e}")))
}

enum ApiError {
    BadRequest(String),
    Batch(InvoiceError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Batch(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

async fn upload_invoices(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut documents = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("unreadable multipart body: {e}")))?
    {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }
        let filename = field
            .file_name()
            .map(sanitize_filename)
            .unwrap_or_else(|| format!("upload_{}.pdf", documents.len() + 1));
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("cannot read {filename}: {e}")))?;
        documents.push(Document::new(filename, bytes.to_vec()));
    }

    if documents.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "no files uploaded; send PDFs in the '{FILES_FIELD}' field"
        )));
    }
    info!("Received {} files", documents.len());

    let guard = state.batch_lock.lock().await;
    let result = state
        .pipeline
        .process_batch(documents)
        .await
        .map_err(|e| {
            error!("Batch failed: {}", e);
            ApiError::Batch(e)
        })?;
    let archive = tokio::fs::read(&result.archive_path).await.map_err(|e| {
        ApiError::Batch(InvoiceError::ArchiveFailed {
            path: result.archive_path.clone(),
            detail: e.to_string(),
        })
    })?;
    drop(guard);

    let failed = result.stats.failed_documents;
    if failed > 0 {
        warn!("{} of {} documents failed", failed, result.stats.total_documents);
    }

    let disposition = format!(
        "attachment; filename=\"{}\"",
        state.pipeline.layout().archive_name
    );
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (HeaderName::from_static(FAILED_DOCUMENTS_HEADER), failed.to_string()),
        ],
        archive,
    )
        .into_response())
}
