//! HTTP server.
//!
//! Exposes the intake pipeline over a small JSON API. The transport only
//! extracts the upload and its declared metadata; every decision is made by
//! [`IntakeService::submit`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/analyze` | Multipart upload (field `image`) → classification |
//! | `GET`  | `/api/stats` | Cache size and pipeline counters |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Other methods on these paths get `405 Method Not Allowed`.
//!
//! # Response Contract
//!
//! Success:
//!
//! ```json
//! { "result": "Pneumonia", "from_cache": false, "fingerprint": "name:…", "confidence": null }
//! ```
//!
//! Errors:
//!
//! ```json
//! { "error": { "code": "rejected", "message": "No image file uploaded." } }
//! ```
//!
//! Error codes: `rejected` (400), `classifier_failed` (502).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end
//! served from another origin can upload directly.

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use scan_intake_core::models::{SubmitOutcome, UploadedImage};

use crate::config::Config;
use crate::intake::{IntakeService, IntakeStats};

/// Name of the multipart field carrying the upload.
pub const IMAGE_FIELD: &str = "image";

/// Room for multipart boundaries and part headers on top of the payload limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    service: Arc<IntakeService>,
}

/// Starts the HTTP server with the service described by `config`.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(IntakeService::from_config(config).await?);
    run_server_with_service(config, service).await
}

/// Starts the HTTP server around an already-built [`IntakeService`].
///
/// Used by tests and embedders that supply their own classifier or cache.
pub async fn run_server_with_service(
    config: &Config,
    service: Arc<IntakeService>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(service, config.intake.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "intake server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router without binding a socket.
pub fn router(service: Arc<IntakeService>, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/analyze", post(handle_analyze))
        .route("/api/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(
            max_upload_bytes.saturating_add(MULTIPART_OVERHEAD),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { service })
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Inner error detail with a machine-readable code and human-readable message.
#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"rejected"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Constructs a 400 error for uploads that fail validation.
fn rejected(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "rejected".to_string(),
        message: message.into(),
    }
}

/// Constructs a 502 error for classifier failures.
fn classifier_failed(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "classifier_failed".to_string(),
        message: message.into(),
    }
}

/// Malformed or oversized multipart bodies are rejections, not server faults.
fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        rejected("Uploaded file is too large.")
    } else {
        rejected(format!("Malformed upload: {}", err.body_text()))
    }
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    /// The crate version from `Cargo.toml`.
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/stats ============

async fn handle_stats(State(state): State<AppState>) -> Json<IntakeStats> {
    Json(state.service.stats().await)
}

// ============ POST /api/analyze ============

/// JSON response body for a classified upload.
#[derive(Serialize)]
struct AnalyzeResponse {
    /// The label assigned to the image.
    result: String,
    from_cache: bool,
    fingerprint: String,
    confidence: Option<f32>,
}

/// Handler for `POST /api/analyze`.
///
/// Bodies that are not `multipart/form-data` are rejected with the JSON
/// error body. Reads the first multipart field named `image`, passes its bytes,
/// declared content type, and original filename to the intake service, and
/// maps the outcome to an HTTP response.
async fn handle_analyze(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let mut multipart = multipart
        .map_err(|e| rejected(format!("Expected a multipart upload: {}", e.body_text())))?;
    let mut upload = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let mime_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        upload = Some(UploadedImage {
            bytes: bytes.to_vec(),
            mime_type,
            filename,
        });
        break;
    }

    let image = upload.ok_or_else(|| rejected("No image file uploaded."))?;

    match state.service.submit(image).await {
        SubmitOutcome::Classified {
            label,
            from_cache,
            fingerprint,
            confidence,
        } => Ok(Json(AnalyzeResponse {
            result: label,
            from_cache,
            fingerprint: fingerprint.to_string(),
            confidence,
        })),
        SubmitOutcome::Rejected { reason } => Err(rejected(reason)),
        SubmitOutcome::ClassifierFailed { detail } => Err(classifier_failed(detail)),
    }
}
