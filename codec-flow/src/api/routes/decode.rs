//! Decode routes, nested under `/api/sessions/{key}/decode`.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Serialize;

use super::{MessageResponse, StartResponse, require_session};
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::flow::{FlowEvent, FlowStatus, ReportedTimes};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(poll_decode).post(start_decode))
        .route("/metadata", get(decode_metadata))
        .route("/reset", post(reset_decode))
}

#[derive(Debug, Serialize)]
pub struct DecodePoll {
    #[serde(flatten)]
    pub times: ReportedTimes,
    pub progress: Option<f64>,
    pub eta: Option<f64>,
    pub status: FlowStatus,
}

/// Decode the session's current video.
async fn start_decode(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<StartResponse>> {
    let session = require_session(&state, &key)?;
    let video = session
        .video()
        .ok_or_else(|| ApiError::bad_request("No filename available for decode"))?;

    let outcome = session.decode.start(video).await?;
    Ok(Json(StartResponse::new(outcome, session.decode.status())))
}

async fn poll_decode(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<DecodePoll>> {
    let session = require_session(&state, &key)?;
    let status = session.decode.status();
    let times = session
        .decode
        .with_record(|record| record.derived().reported_times());

    Ok(Json(DecodePoll {
        times,
        progress: status.progress_percent,
        eta: status.eta_seconds,
        status,
    }))
}

async fn decode_metadata(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<Option<FlowEvent>>> {
    let session = require_session(&state, &key)?;
    Ok(Json(session.decode.metadata()))
}

/// Reset decode and the search that reads its output.
async fn reset_decode(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let session = require_session(&state, &key)?;
    session.reset_decode_chain().await;
    Ok(Json(MessageResponse::ok(format!(
        "Decode flow for key '{}' has been reset",
        key
    ))))
}
