//! Session routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::{MessageResponse, require_session};
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::flow::FlowStatus;
use crate::session::{SessionSummary, VideoFile, find_video_file, video_base_name};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sessions).post(open_session))
        .route("/{key}", get(get_session).delete(delete_session))
        .route("/{key}/reset", post(reset_session))
}

#[derive(Debug, Deserialize)]
pub struct OpenSessionRequest {
    /// Uploaded file name, e.g. `lot.mkv`.
    pub filename: String,
}

#[derive(Debug, Serialize)]
pub struct OpenSessionResponse {
    pub key: String,
    #[serde(flatten)]
    pub video: VideoFile,
}

#[derive(Debug, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub summary: SessionSummary,
    pub encode: FlowStatus,
    pub decode: FlowStatus,
    pub search: FlowStatus,
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.sessions.list())
}

/// Get or create the session for a video that is already on disk.
async fn open_session(
    State(state): State<AppState>,
    Json(request): Json<OpenSessionRequest>,
) -> ApiResult<Json<OpenSessionResponse>> {
    let base_name = video_base_name(&request.filename)
        .ok_or_else(|| ApiError::bad_request("filename parameter is required"))?;

    let video = find_video_file(&state.data_dir, &base_name)
        .await
        .ok_or_else(|| {
            ApiError::not_found(format!(
                "Video file '{}' not found. Please upload the video first.",
                request.filename
            ))
        })?;

    let session = state.sessions.get_or_create(&base_name);
    session.switch_video(&base_name).await;

    Ok(Json(OpenSessionResponse {
        key: session.key().to_string(),
        video,
    }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<SessionDetail>> {
    let session = require_session(&state, &key)?;
    Ok(Json(SessionDetail {
        summary: session.summary(),
        encode: session.encode.status(),
        decode: session.decode.status(),
        search: session.search.status(),
    }))
}

/// Stop everything the session runs and forget it. Files on disk are kept.
async fn delete_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .sessions
        .remove(&key)
        .await
        .ok_or_else(|| ApiError::not_found(format!("No session found for key '{}'", key)))?;
    Ok(Json(MessageResponse::ok(format!(
        "Session '{}' removed",
        key
    ))))
}

async fn reset_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let session = require_session(&state, &key)?;
    session.reset_encode_chain().await;
    Ok(Json(MessageResponse::ok(format!(
        "All flows for key '{}' have been reset",
        key
    ))))
}
