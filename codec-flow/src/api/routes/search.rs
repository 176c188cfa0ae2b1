//! Vector search routes, nested under `/api/sessions/{key}/search`.

use std::path::PathBuf;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{StartResponse, require_session};
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::flow::search::scaled_results;
use crate::flow::{FlowStatus, PreprocessingInfo, SearchArgs};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(poll_search).post(start_search))
        .route("/results", get(search_results))
}

#[derive(Debug, Deserialize)]
pub struct StartSearchRequest {
    /// Scene to search; defaults to the session's video.
    pub video_path: Option<String>,
    pub images_path: Vec<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct SearchPoll {
    pub finished: bool,
    pub in_progress: bool,
    pub status: FlowStatus,
}

#[derive(Debug, Serialize)]
pub struct SearchResults {
    /// `ok`, or `no_results` while nothing has been reported.
    pub result: &'static str,
    pub data: Vec<Value>,
    pub metadata: Option<PreprocessingInfo>,
}

/// Start a fresh search; any previous search of the session is discarded.
async fn start_search(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<StartSearchRequest>,
) -> ApiResult<Json<StartResponse>> {
    let session = require_session(&state, &key)?;
    let video = request
        .video_path
        .filter(|video| !video.is_empty())
        .or_else(|| session.video())
        .ok_or_else(|| ApiError::bad_request("video_path and images_path parameters are required"))?;

    session.search.reset().await;
    let outcome = session
        .search
        .start(SearchArgs {
            video,
            images: request.images_path,
        })
        .await?;
    Ok(Json(StartResponse::new(outcome, session.search.status())))
}

async fn poll_search(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<SearchPoll>> {
    let session = require_session(&state, &key)?;
    let status = session.search.status();
    Ok(Json(SearchPoll {
        finished: status.is_finished,
        in_progress: !status.is_finished,
        status,
    }))
}

/// Results so far, with frame timestamps rescaled to source time.
async fn search_results(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<SearchResults>> {
    let session = require_session(&state, &key)?;
    let data = session
        .search
        .with_record(|record| scaled_results(record.derived().results()));

    Ok(Json(SearchResults {
        result: if data.is_empty() { "no_results" } else { "ok" },
        data,
        metadata: session.search.metadata(),
    }))
}
