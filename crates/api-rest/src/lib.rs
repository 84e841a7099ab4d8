//! # API REST
//!
//! REST API implementation for Record Link.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS, status codes)
//!
//! All record logic lives in `recordlink-core`; handlers translate requests into
//! [`SharingService`] calls and map [`CoreError`]s onto HTTP statuses.

#![warn(rust_2018_idioms)]

pub mod types;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use recordlink_core::{
    CoreError, CoreResult, FilesError, IssuedToken, SharingService, TokenError,
};
use recordlink_token::{Clock, SystemClock};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use types::{
    DecodeReq, DecodeRes, HealthRes, IssueDataReq, IssueLinkReq, IssueSummaryReq, IssuedTokenRes,
    StoredFileRes,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Header carrying the original filename of an upload.
pub const FILE_NAME_HEADER: &str = "x-file-name";

/// Largest accepted upload (10 MiB).
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Application state shared across REST API handlers
#[derive(Clone)]
pub struct AppState {
    sharing: Arc<SharingService>,
    clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(sharing: Arc<SharingService>) -> Self {
        Self {
            sharing,
            clock: Arc::new(SystemClock),
        }
    }

    /// Clock used for scan-time expiry checks and locator verification.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        upload_file,
        download_file,
        issue_link,
        issue_data,
        issue_summary,
        decode_token,
    ),
    components(schemas(
        HealthRes,
        StoredFileRes,
        IssueLinkReq,
        IssueDataReq,
        IssueSummaryReq,
        IssuedTokenRes,
        DecodeReq,
        DecodeRes,
    ))
)]
pub struct ApiDoc;

/// Builds the REST router, including Swagger UI and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/files",
            post(upload_file).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/files/:hash", get(download_file))
        .route("/tokens/link", post(issue_link))
        .route("/tokens/data", post(issue_data))
        .route("/tokens/summary", post(issue_summary))
        .route("/tokens/decode", post(decode_token))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Maps a core error onto a status code and a fixed message, logging it on the way.
fn error_response(context: &str, e: &CoreError) -> (StatusCode, &'static str) {
    let (status, message) = match e {
        CoreError::InvalidInput(_) | CoreError::Token(TokenError::InvalidInput(_)) => {
            (StatusCode::BAD_REQUEST, "Invalid input")
        }
        CoreError::Token(TokenError::UpstreamResolution { .. }) => {
            (StatusCode::BAD_GATEWAY, "Failed to resolve file locator")
        }
        CoreError::Token(TokenError::PayloadTooLarge { .. }) => (
            StatusCode::PAYLOAD_TOO_LARGE,
            "Token too large for a scannable image",
        ),
        CoreError::Token(TokenError::Expired { .. }) => (StatusCode::GONE, "Token expired"),
        CoreError::Files(FilesError::FileAlreadyExists(_)) => {
            (StatusCode::CONFLICT, "File already exists")
        }
        CoreError::Files(FilesError::NotFound(_)) => (StatusCode::NOT_FOUND, "File not found"),
        CoreError::Files(FilesError::InvalidHash(_)) => {
            (StatusCode::BAD_REQUEST, "Invalid file reference")
        }
        CoreError::Files(FilesError::InvalidSignature) => {
            (StatusCode::FORBIDDEN, "Invalid locator signature")
        }
        CoreError::Files(FilesError::LocatorExpired { .. }) => {
            (StatusCode::GONE, "Locator expired")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
    };

    if status.is_server_error() {
        tracing::error!("{} error: {:?}", context, e);
    } else {
        tracing::warn!("{} rejected: {}", context, e);
    }
    (status, message)
}

/// Renders a freshly issued token and wraps it for the response.
fn issued_response(
    state: &AppState,
    context: &str,
    issued: CoreResult<IssuedToken>,
) -> Result<Json<IssuedTokenRes>, (StatusCode, &'static str)> {
    let issued = issued.map_err(|e| error_response(context, &e))?;
    let png = state
        .sharing
        .render_png(&issued)
        .map_err(|e| error_response(context, &e))?;
    Ok(Json(IssuedTokenRes::new(issued, &png)))
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "Record Link REST API is alive".into(),
    })
}

#[utoipa::path(
    post,
    path = "/files",
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    params(
        ("x-file-name" = Option<String>, Header, description = "Original filename of the upload")
    ),
    responses(
        (status = 201, description = "File stored", body = StoredFileRes),
        (status = 409, description = "Identical content already stored"),
        (status = 413, description = "Upload larger than 10 MiB"),
        (status = 500, description = "Internal server error")
    )
)]
/// Store an uploaded file
///
/// The raw request body is stored content-addressed. The returned `hash` is the file reference
/// to pass to `/tokens/link`.
#[axum::debug_handler]
async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<StoredFileRes>), (StatusCode, &'static str)> {
    let filename = headers
        .get(FILE_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match state.sharing.store_file(filename, &body) {
        Ok(metadata) => Ok((StatusCode::CREATED, Json(metadata.into()))),
        Err(e) => Err(error_response("Store file", &e)),
    }
}

/// Query string of a file locator.
#[derive(Debug, Deserialize)]
struct LocatorQuery {
    expires: i64,
    signature: String,
}

#[utoipa::path(
    get,
    path = "/files/{hash}",
    params(
        ("hash" = String, Path, description = "SHA-256 of the file"),
        ("expires" = i64, Query, description = "Locator expiry, unix seconds"),
        ("signature" = String, Query, description = "Hex HMAC-SHA256 over hash and expiry")
    ),
    responses(
        (status = 200, description = "File content", body = Vec<u8>),
        (status = 403, description = "Invalid locator signature"),
        (status = 404, description = "File not found"),
        (status = 410, description = "Locator expired")
    )
)]
/// Serve a shared file through a time-limited locator
#[axum::debug_handler]
async fn download_file(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Query(query): Query<LocatorQuery>,
) -> Result<impl IntoResponse, (StatusCode, &'static str)> {
    let now = state.clock.now();
    match state
        .sharing
        .open_shared_file(&hash, query.expires, &query.signature, now)
    {
        Ok(file) => {
            let content_type = file
                .media_type
                .map(|t| t.into_inner())
                .unwrap_or_else(|| "application/octet-stream".into());
            Ok(([(header::CONTENT_TYPE, content_type)], file.bytes))
        }
        Err(e) => Err(error_response("Open shared file", &e)),
    }
}

#[utoipa::path(
    post,
    path = "/tokens/link",
    request_body = IssueLinkReq,
    responses(
        (status = 200, description = "Link token issued", body = IssuedTokenRes),
        (status = 400, description = "Bad request"),
        (status = 413, description = "Token too large for a scannable image"),
        (status = 502, description = "A file locator could not be resolved")
    )
)]
/// Issue a link-access token over stored files
///
/// One signed locator is resolved per file reference. If any reference cannot be resolved no
/// token is issued.
#[axum::debug_handler]
async fn issue_link(
    State(state): State<AppState>,
    Json(req): Json<IssueLinkReq>,
) -> Result<Json<IssuedTokenRes>, (StatusCode, &'static str)> {
    let issued = state
        .sharing
        .issue_link(&req.file_references, &req.patient_id, req.ttl_seconds)
        .await;
    issued_response(&state, "Issue link token", issued)
}

#[utoipa::path(
    post,
    path = "/tokens/data",
    request_body = IssueDataReq,
    responses(
        (status = 200, description = "Data token issued", body = IssuedTokenRes),
        (status = 400, description = "Bad request"),
        (status = 413, description = "Token too large for a scannable image")
    )
)]
/// Issue a data-access token embedding record summaries
#[axum::debug_handler]
async fn issue_data(
    State(state): State<AppState>,
    Json(req): Json<IssueDataReq>,
) -> Result<Json<IssuedTokenRes>, (StatusCode, &'static str)> {
    let issued = state.sharing.issue_data(
        &req.patient_id,
        &req.patient_name,
        req.records,
        req.ttl_seconds,
    );
    issued_response(&state, "Issue data token", issued)
}

#[utoipa::path(
    post,
    path = "/tokens/summary",
    request_body = IssueSummaryReq,
    responses(
        (status = 200, description = "Summary token issued", body = IssuedTokenRes),
        (status = 413, description = "Token too large for a scannable image")
    )
)]
/// Issue a patient-summary token
#[axum::debug_handler]
async fn issue_summary(
    State(state): State<AppState>,
    Json(req): Json<IssueSummaryReq>,
) -> Result<Json<IssuedTokenRes>, (StatusCode, &'static str)> {
    let issued = state.sharing.issue_summary(req.patient);
    issued_response(&state, "Issue summary token", issued)
}

#[utoipa::path(
    post,
    path = "/tokens/decode",
    request_body = DecodeReq,
    responses(
        (status = 200, description = "Scan report", body = DecodeRes)
    )
)]
/// Decode scanned text
///
/// Never fails: text that is not a token is reported as `unrecognized` or `unreadable`.
#[axum::debug_handler]
async fn decode_token(
    State(state): State<AppState>,
    Json(req): Json<DecodeReq>,
) -> Json<DecodeRes> {
    let report = state.sharing.inspect(&req.text, state.clock.now());
    Json(report.into())
}
