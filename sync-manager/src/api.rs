//! Sync Manager HTTP API: device and record endpoints.
//!
//! The caller is identified by `Authorization: Bearer <user_id>`; session
//! management itself lives outside this service.
//!
//! - `GET /api/providers`: registered providers
//! - `GET /api/devices` / `POST /api/devices`: list / connect
//! - `DELETE /api/devices/:device_id`: disconnect
//! - `POST /api/devices/:device_id/sync`: sync one device
//! - `GET /api/devices/:device_id/records` / `DELETE`: device data / purge
//! - `POST /api/sync`: sync all devices of the caller
//! - `GET /api/records/latest/:metric`: latest record for a metric

use crate::connections::ConnectionRegistry;
use crate::orchestrator::SyncOrchestrator;
use crate::registry::AdapterRegistry;
use crate::types::{SyncReport, SyncSummary};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use healthsync::{
    ConnectedDevice, DeviceRecord, ErrorKind, MetricType, ProviderType, SyncError, SyncResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared state for the API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub connections: Arc<ConnectionRegistry>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub adapters: Arc<AdapterRegistry>,
}

/// Request body for `POST /api/devices`.
#[derive(Deserialize)]
pub struct ConnectRequest {
    pub provider: String,
    /// Reject the request if the provider is already connected
    #[serde(default)]
    pub strict: bool,
}

/// A single entry in the `GET /api/providers` response.
#[derive(Serialize)]
pub struct ProviderInfo {
    pub provider: ProviderType,
    pub display_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

/// A single entry in the `POST /api/sync` response.
#[derive(Serialize)]
pub struct SyncReportEntry {
    pub device_id: String,
    pub provider: ProviderType,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SyncSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl From<SyncReport> for SyncReportEntry {
    fn from(report: SyncReport) -> Self {
        let (summary, error) = match report.result {
            Ok(summary) => (Some(summary), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            device_id: report.device_id,
            provider: report.provider,
            ok: error.is_none(),
            summary,
            kind: error.as_ref().map(SyncError::kind),
            error: error.map(|e| e.to_string()),
        }
    }
}

/// Response for `DELETE /api/devices/:device_id/records`.
#[derive(Serialize)]
pub struct PurgeResponse {
    pub removed: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: ErrorKind,
}

// ---------------------------------------------------------------------------
// Business logic (called from HTTP handlers and unit tests)
// ---------------------------------------------------------------------------

/// Lists registered providers with their display names.
pub fn handle_list_providers(state: &ApiState) -> Vec<ProviderInfo> {
    state
        .adapters
        .providers()
        .into_iter()
        .filter_map(|provider| state.adapters.get(provider).ok())
        .map(|adapter| ProviderInfo {
            provider: adapter.provider(),
            display_name: adapter.display_name().to_string(),
            scopes: adapter
                .oauth_config()
                .map(|oauth| oauth.scopes)
                .unwrap_or_default(),
        })
        .collect()
}

/// Parses the provider name and connects it for `user_id`.
pub async fn handle_connect(
    state: &ApiState,
    user_id: &str,
    req: ConnectRequest,
) -> SyncResult<ConnectedDevice> {
    let provider: ProviderType = req.provider.parse()?;
    if req.strict {
        state.connections.connect_strict(user_id, provider).await
    } else {
        state.connections.connect(user_id, provider).await
    }
}

/// Latest record for a metric name; no record at all is a not-found.
pub async fn handle_latest(
    state: &ApiState,
    user_id: &str,
    metric: &str,
) -> SyncResult<DeviceRecord> {
    let metric: MetricType = metric.parse()?;
    state
        .orchestrator
        .latest(user_id, metric)
        .await?
        .ok_or_else(|| SyncError::NotFound(format!("no {} records", metric)))
}

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

/// Extract the caller's user id from `Authorization: Bearer <user_id>`.
fn caller(headers: &HeaderMap) -> Result<String, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::Unauthorized("missing Authorization header".to_string()))?
        .to_str()
        .map_err(|_| AppError::Unauthorized("invalid Authorization header".to_string()))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::Unauthorized("expected 'Bearer <user_id>'".to_string()))?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::Unauthorized("expected 'Bearer <user_id>'".to_string()));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::Unauthorized("empty bearer token".to_string()));
    }
    Ok(token.to_string())
}

async fn list_providers(State(state): State<Arc<ApiState>>) -> Json<Vec<ProviderInfo>> {
    Json(handle_list_providers(&state))
}

async fn list_devices(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConnectedDevice>>, AppError> {
    let user_id = caller(&headers)?;
    Ok(Json(state.connections.list(&user_id).await?))
}

async fn connect_device(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<ConnectRequest>,
) -> Result<(StatusCode, Json<ConnectedDevice>), AppError> {
    let user_id = caller(&headers)?;
    let device = handle_connect(&state, &user_id, req).await?;
    Ok((StatusCode::CREATED, Json(device)))
}

async fn disconnect_device(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let user_id = caller(&headers)?;
    state.connections.disconnect(&user_id, &device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sync_device(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
) -> Result<Json<SyncSummary>, AppError> {
    let user_id = caller(&headers)?;
    Ok(Json(state.orchestrator.sync_one(&user_id, &device_id).await?))
}

async fn sync_all(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<SyncReportEntry>>, AppError> {
    let user_id = caller(&headers)?;
    let reports = state.orchestrator.sync_all(&user_id).await?;
    Ok(Json(reports.into_iter().map(SyncReportEntry::from).collect()))
}

async fn device_records(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
) -> Result<Json<Vec<DeviceRecord>>, AppError> {
    let user_id = caller(&headers)?;
    Ok(Json(
        state.orchestrator.device_data(&user_id, &device_id).await?,
    ))
}

async fn purge_device_records(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
) -> Result<Json<PurgeResponse>, AppError> {
    let user_id = caller(&headers)?;
    let removed = state
        .orchestrator
        .purge_records(&user_id, &device_id)
        .await?;
    Ok(Json(PurgeResponse { removed }))
}

async fn latest_record(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(metric): Path<String>,
) -> Result<Json<DeviceRecord>, AppError> {
    let user_id = caller(&headers)?;
    Ok(Json(handle_latest(&state, &user_id, &metric).await?))
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum AppError {
    Unauthorized(String),
    Sync(SyncError),
}

impl From<SyncError> for AppError {
    fn from(e: SyncError) -> Self {
        AppError::Sync(e)
    }
}

/// HTTP status for each error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::DuplicateConnection | ErrorKind::Busy => StatusCode::CONFLICT,
        ErrorKind::Auth => StatusCode::UNAUTHORIZED,
        ErrorKind::Network => StatusCode::BAD_GATEWAY,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (error, kind) = match self {
            AppError::Unauthorized(msg) => (msg, ErrorKind::Auth),
            AppError::Sync(e) => {
                let kind = e.kind();
                (e.to_string(), kind)
            }
        };
        let body = ErrorResponse { error, kind };
        let status = status_for(kind);
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/providers", get(list_providers))
        .route("/api/devices", get(list_devices).post(connect_device))
        .route(
            "/api/devices/:device_id",
            delete(disconnect_device),
        )
        .route("/api/devices/:device_id/sync", post(sync_device))
        .route(
            "/api/devices/:device_id/records",
            get(device_records).delete(purge_device_records),
        )
        .route("/api/sync", post(sync_all))
        .route("/api/records/latest/:metric", get(latest_record))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
