//! Read-only HTTP routes over the published cluster snapshot.

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use chrono::{SecondsFormat, Utc};
use coordrtt_core::{LocalRttView, NotReady, SnapshotReader};
use serde_json::{Value, json};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    pub snapshots: SnapshotReader,
}

impl ApiState {
    #[must_use]
    pub const fn new(snapshots: SnapshotReader) -> Self {
        Self { snapshots }
    }
}

#[derive(Debug)]
pub enum ApiError {
    /// No snapshot has been published yet.
    SnapshotNotReady,
}

impl From<NotReady> for ApiError {
    fn from(_: NotReady) -> Self {
        Self::SnapshotNotReady
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::SnapshotNotReady => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SNAPSHOT_NOT_READY",
                "cluster snapshot not ready; the first refresh has not completed",
            ),
        };
        let body = json!({
            "error": {
                "code": code,
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Full cluster snapshot, served from the pre-encoded body.
async fn cluster_status(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let snapshot = state.snapshots.read()?;
    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        snapshot.body(),
    )
        .into_response())
}

/// The local node's RTT row.
async fn local_rtts(State(state): State<ApiState>) -> Result<Json<LocalRttView>, ApiError> {
    let snapshot = state.snapshots.read()?;
    Ok(Json(LocalRttView::from_status(
        snapshot.status(),
        snapshot.local_node(),
    )))
}

async fn health(State(state): State<ApiState>) -> Json<Value> {
    let published = state.snapshots.read().ok();
    Json(json!({
        "status": "healthy",
        "service": "coordrtt",
        "version": env!("CARGO_PKG_VERSION"),
        "ready": published.is_some(),
        "snapshot_timestamp": published.as_ref().map(|s| s.status().timestamp_rfc3339()),
        "nodes": published.as_ref().map(|s| s.status().nodes.len()),
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }))
}

/// Builds the router; attach state with `.with_state(ApiState::new(..))`.
pub fn create_api_routes() -> Router<ApiState> {
    Router::new()
        .route("/cluster-status", get(cluster_status))
        .route("/rtts", get(local_rtts))
        .route("/health", get(health))
}
