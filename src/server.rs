//! HTTP API
//!
//! ```text
//! POST   /api/snapshots   capture a batch of URLs
//! GET    /api/history     most recent capture attempts
//! DELETE /api/history     remove history entries by id
//! GET    /api/health      liveness
//! GET    /snapshots/*     stored artifacts
//! ```

use crate::{
    capture_batch, format_timestamp, Config, HistoryEntry, HistoryError, HistoryStore,
    SnapshotResponseItem, SnapshotService,
};
use axum::extract::{Json, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 200;

/// Shared by every handler; built once per process.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SnapshotService>,
    pub store: Arc<HistoryStore>,
    pub config: Arc<Config>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotBatchRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub force_browser: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotBatchResponse {
    pub results: Vec<SnapshotResponseItem>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub items: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteHistoryRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteHistoryResponse {
    pub deleted: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for HistoryError {
    fn into_response(self) -> Response {
        error!("History store failure: {}", self);
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/api/snapshots", post(create_snapshots))
        .route("/api/history", get(list_history).delete(delete_history))
        .route("/api/health", get(health))
        .nest_service("/snapshots", ServeDir::new(state.service.snapshot_root()));

    let router = match cors_layer(&state.config.cors_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.with_state(state)
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

/// Clamp a requested page size into `1..=MAX_HISTORY_LIMIT`.
pub fn clamp_history_limit(limit: Option<i64>) -> usize {
    let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT as i64);
    limit.clamp(1, MAX_HISTORY_LIMIT as i64) as usize
}

async fn create_snapshots(
    State(state): State<AppState>,
    Json(req): Json<SnapshotBatchRequest>,
) -> Json<SnapshotBatchResponse> {
    let results = capture_batch(&state.service, &state.store, &req.urls, req.force_browser).await;
    Json(SnapshotBatchResponse { results })
}

async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, HistoryError> {
    let items = state
        .store
        .list_recent(clamp_history_limit(query.limit))
        .await?;
    Ok(Json(HistoryResponse { items }))
}

async fn delete_history(
    State(state): State<AppState>,
    Json(req): Json<DeleteHistoryRequest>,
) -> Result<Json<DeleteHistoryResponse>, HistoryError> {
    let deleted = state.store.delete(req.ids).await?;
    Ok(Json(DeleteHistoryResponse { deleted }))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: format_timestamp(Utc::now()),
    })
}

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn run_server<F>(
    state: AppState,
    listener: TcpListener,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    let app = create_router(state);

    info!("Listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Server stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_limit_is_clamped() {
        assert_eq!(clamp_history_limit(None), 50);
        assert_eq!(clamp_history_limit(Some(0)), 1);
        assert_eq!(clamp_history_limit(Some(-5)), 1);
        assert_eq!(clamp_history_limit(Some(75)), 75);
        assert_eq!(clamp_history_limit(Some(10_000)), 200);
    }

    #[test]
    fn empty_cors_list_disables_layer() {
        assert!(cors_layer(&[]).is_none());
        assert!(cors_layer(&["http://localhost:5173".to_string()]).is_some());
    }
}
