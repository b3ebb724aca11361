//! HTTP request handlers

use super::{ApiError, AppContext};
use crate::playback::{EngineStatus, PlayReceipt};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chorus_common::events::TrackInfo;
use serde::{Deserialize, Serialize};
use tracing::info;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    git_hash: String,
    build_timestamp: String,
    build_profile: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

impl StatusResponse {
    fn ok() -> Json<Self> {
        Json(Self {
            status: "ok".to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PlayRequest {
    source: String,
    #[serde(default = "default_requester")]
    requester: String,
}

fn default_requester() -> String {
    "api".to_string()
}

#[derive(Debug, Deserialize)]
pub struct RemoveQuery {
    generation: u64,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    sessions: Vec<EngineStatus>,
}

#[derive(Debug, Serialize)]
pub struct RemovedResponse {
    removed: TrackInfo,
}

// ============================================================================
// Health
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "voice_player".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
    })
}

// ============================================================================
// Sessions
// ============================================================================

/// GET /sessions
pub async fn list_sessions(State(ctx): State<AppContext>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: ctx.manager.sessions().await,
    })
}

/// GET /sessions/:id
pub async fn session_status(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<EngineStatus>, ApiError> {
    Ok(Json(ctx.manager.status(&id).await?))
}

/// DELETE /sessions/:id - explicit disconnect
pub async fn release_session(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if ctx.manager.release(&id).await {
        info!(session = %id, "Session released via API");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(crate::Error::NotFound(format!("no active session {}", id)).into())
    }
}

// ============================================================================
// Playback control
// ============================================================================

/// POST /sessions/:id/play - queue a track, start playback if idle
pub async fn play(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(req): Json<PlayRequest>,
) -> Result<(StatusCode, Json<PlayReceipt>), ApiError> {
    let receipt = ctx.manager.play(&id, &req.source, &req.requester).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// POST /sessions/:id/pause
pub async fn pause(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    ctx.manager.pause(&id).await?;
    Ok(StatusResponse::ok())
}

/// POST /sessions/:id/resume
pub async fn resume(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    ctx.manager.resume(&id).await?;
    Ok(StatusResponse::ok())
}

/// POST /sessions/:id/skip
pub async fn skip(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    ctx.manager.skip(&id).await?;
    Ok(StatusResponse::ok())
}

/// POST /sessions/:id/stop
pub async fn stop(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    ctx.manager.stop(&id).await?;
    Ok(StatusResponse::ok())
}

/// DELETE /sessions/:id/queue/:index?generation=N
///
/// `generation` is the `queue_generation` of the status the index was read from.
pub async fn remove_entry(
    State(ctx): State<AppContext>,
    Path((id, index)): Path<(String, usize)>,
    Query(query): Query<RemoveQuery>,
) -> Result<Json<RemovedResponse>, ApiError> {
    let removed = ctx.manager.remove(&id, index, query.generation).await?;
    Ok(Json(RemovedResponse { removed }))
}
