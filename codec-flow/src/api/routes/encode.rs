//! Encode routes, nested under `/api/sessions/{key}/encode`.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::{MessageResponse, StartResponse, require_session};
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::flow::{EncodeMetadata, FlowKind, FlowStatus, ReportedTimes};
use crate::session::video_base_name;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(poll_encode).post(start_encode))
        .route("/metadata", get(encode_metadata))
        .route("/reset", post(reset_encode))
}

#[derive(Debug, Deserialize)]
pub struct StartEncodeRequest {
    pub filename: String,
}

#[derive(Debug, Serialize)]
pub struct EncodePoll {
    #[serde(flatten)]
    pub times: ReportedTimes,
    /// Seconds, from the `encode_end` report.
    pub encode_time: Option<f64>,
    pub status: FlowStatus,
}

/// Start encoding `filename`. Switching to a different video resets every
/// flow of the session first.
async fn start_encode(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<StartEncodeRequest>,
) -> ApiResult<Json<StartResponse>> {
    let session = require_session(&state, &key)?;
    let video = video_base_name(&request.filename)
        .ok_or_else(|| ApiError::bad_request("filename parameter is required"))?;

    session.switch_video(&video).await;
    let outcome = session.encode.start(video).await?;
    Ok(Json(StartResponse::new(outcome, session.encode.status())))
}

async fn poll_encode(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<EncodePoll>> {
    let session = require_session(&state, &key)?;
    let encode = &session.encode;
    let (times, encode_time) = encode.with_record(|record| {
        let derived = record.derived();
        let encode_time = encode
            .kind()
            .metadata(derived)
            .and_then(|metadata| metadata.encode_time());
        (derived.reported_times(), encode_time)
    });

    Ok(Json(EncodePoll {
        times,
        encode_time,
        status: session.encode.status(),
    }))
}

async fn encode_metadata(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<Option<EncodeMetadata>>> {
    let session = require_session(&state, &key)?;
    Ok(Json(session.encode.metadata()))
}

/// Reset encode and everything downstream of it; the video is kept.
async fn reset_encode(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let session = require_session(&state, &key)?;
    session.reset_encode_chain().await;
    Ok(Json(MessageResponse::ok(format!(
        "Encode, decode, and vector search flows for key '{}' have been reset",
        key
    ))))
}
