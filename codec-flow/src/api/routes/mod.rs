//! API route modules.
//!
//! Organizes routes by resource type.

pub mod decode;
pub mod encode;
pub mod health;
pub mod hls;
pub mod logging;
pub mod search;
pub mod sessions;

use std::sync::Arc;

use axum::Router;
use serde::Serialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::flow::{FlowStatus, StartOutcome};
use crate::session::Session;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    let data_dir = state.data_dir.clone();
    Router::new()
        .nest("/api/health", health::router())
        .nest("/api/logging", logging::router())
        .nest("/api/sessions", sessions::router())
        .nest("/api/sessions/{key}/encode", encode::router())
        .nest("/api/sessions/{key}/decode", decode::router())
        .nest("/api/sessions/{key}/search", search::router())
        .nest("/hls", hls::router(&data_dir))
        .with_state(state)
}

/// Look up an existing session or fail with 404.
pub(crate) fn require_session(state: &AppState, key: &str) -> ApiResult<Arc<Session>> {
    if key.trim().is_empty() {
        return Err(ApiError::bad_request("Key parameter is required"));
    }
    state
        .sessions
        .get(key)
        .ok_or_else(|| ApiError::not_found(format!("No session found for key '{}'", key)))
}

/// Response to a start request.
#[derive(Debug, Serialize)]
pub struct StartResponse {
    /// `started`, or `already_finished` when a clean run made start a no-op.
    pub result: &'static str,
    pub status: FlowStatus,
}

impl StartResponse {
    pub fn new(outcome: StartOutcome, status: FlowStatus) -> Self {
        let result = match outcome {
            StartOutcome::Started => "started",
            StartOutcome::AlreadyFinished => "already_finished",
        };
        Self { result, status }
    }
}

/// Generic acknowledgement.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub result: &'static str,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            result: "ok",
            message: message.into(),
        }
    }
}
