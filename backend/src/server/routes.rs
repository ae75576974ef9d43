//! REST API routes

use crate::db::{DownloadItem, Settings, SettingsUpdate};
use crate::download::{DownloadStats, NewDownload};
use crate::error::ManagerError;
use crate::{logging, AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Create API routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Downloads
        .route("/downloads", get(list_downloads).post(add_download))
        .route("/downloads/stats", get(download_stats))
        .route("/downloads/{id}", get(get_download).delete(remove_download))
        .route("/downloads/{id}/pause", post(pause_download))
        .route("/downloads/{id}/resume", post(resume_download))
        .route("/downloads/{id}/cancel", post(cancel_download))
        .route("/downloads/{id}/retry", post(retry_download))
        // Settings
        .route("/settings", get(get_settings).put(update_settings))
}

// ============ Download Endpoints ============

/// List all downloads in queue order
async fn list_downloads(State(state): State<Arc<AppState>>) -> Json<Vec<DownloadItem>> {
    Json(state.download_manager.list())
}

/// Add a new download
async fn add_download(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NewDownload>,
) -> Result<(StatusCode, Json<DownloadItem>), AppError> {
    if request.url.trim().is_empty() {
        return Err(AppError::BadRequest("url must not be empty".into()));
    }

    let item = state.download_manager.enqueue(request)?;
    info!(target: logging::APPLICATION, "Added download: {} -> {}", item.url, item.filename);
    Ok((StatusCode::CREATED, Json(item)))
}

async fn get_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DownloadItem>, AppError> {
    state
        .download_manager
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("download not found: {}", id)))
}

/// Remove a download record; running transfers are cancelled first
async fn remove_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.download_manager.delete(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Pause and cancel take effect once the worker stops, so they only
/// acknowledge the request
async fn pause_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.download_manager.pause(&id)?;
    Ok(StatusCode::ACCEPTED)
}

async fn cancel_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.download_manager.cancel(&id)?;
    Ok(StatusCode::ACCEPTED)
}

async fn resume_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DownloadItem>, AppError> {
    Ok(Json(state.download_manager.resume(&id)?))
}

async fn retry_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DownloadItem>, AppError> {
    Ok(Json(state.download_manager.retry(&id)?))
}

/// Get download statistics
async fn download_stats(State(state): State<Arc<AppState>>) -> Json<DownloadStats> {
    Json(state.download_manager.stats())
}

// ============ Settings Endpoints ============

async fn get_settings(State(state): State<Arc<AppState>>) -> Json<Settings> {
    Json(state.download_manager.settings())
}

/// Update settings; omitted fields keep their current value
async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<Settings>, AppError> {
    Ok(Json(state.download_manager.update_settings(update)?))
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(serde_json::json!({ "error": message }));
        (status, body).into_response()
    }
}

impl From<ManagerError> for AppError {
    fn from(err: ManagerError) -> Self {
        let message = err.to_string();
        match err {
            ManagerError::NotFound(_) => AppError::NotFound(message),
            ManagerError::InvalidState { .. } => AppError::Conflict(message),
            ManagerError::Configuration(_) => AppError::BadRequest(message),
            ManagerError::ShuttingDown => AppError::Unavailable(message),
            ManagerError::Store(_) => {
                warn!(target: logging::PERSISTENCE, "Request failed: {}", message);
                AppError::Unavailable(message)
            }
        }
    }
}
