//! Decoded HLS output.
//!
//! `/{video}/decoded/stream.m3u8` is built on every request from the two
//! track playlists the decoder writes; everything else under `/hls` is
//! served straight from the data directory.

use std::path::{Component, Path as FsPath};

use axum::{
    Router,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use hls_splice::{PLAYLIST_CONTENT_TYPE, SpliceOutcome, splice_files};
use serde::Deserialize;
use tower_http::services::ServeDir;

use super::require_session;
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;

/// Playlist written by the first decoder track.
pub const PRIMARY_PLAYLIST: &str = "TreeA_output.m3u8";
/// Playlist written by the second decoder track.
pub const SECONDARY_PLAYLIST: &str = "TreeB_output.m3u8";

pub fn router(data_dir: &FsPath) -> Router<AppState> {
    Router::new()
        .route("/{video}/decoded/stream.m3u8", get(combined_playlist))
        .fallback_service(ServeDir::new(data_dir))
}

#[derive(Debug, Deserialize)]
pub struct PlaylistQuery {
    /// Session key; when absent the session is found by video name.
    pub key: Option<String>,
}

/// A video name must be exactly one normal path component.
fn is_plain_name(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut components = FsPath::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

async fn combined_playlist(
    State(state): State<AppState>,
    Path(video): Path<String>,
    Query(query): Query<PlaylistQuery>,
) -> ApiResult<Response> {
    if !is_plain_name(&video) {
        return Err(ApiError::bad_request("Invalid video name"));
    }

    match query.key.as_deref().filter(|key| !key.is_empty()) {
        Some(key) => {
            require_session(&state, key)?;
        }
        None => {
            state.sessions.find_by_video(&video).ok_or_else(|| {
                ApiError::not_found(format!(
                    "No active session found for video '{}'. Please ensure the video is uploaded and processing has started.",
                    video
                ))
            })?;
        }
    }

    let decoded = state.data_dir.join(&video).join("decoded");
    let outcome = splice_files(
        &decoded.join(PRIMARY_PLAYLIST),
        &decoded.join(SECONDARY_PLAYLIST),
    )
    .await
    .map_err(|e| {
        tracing::warn!(video = %video, "Failed to read decoded playlist: {}", e);
        ApiError::internal("Failed to read decoded playlist")
    })?;

    match outcome {
        SpliceOutcome::NotStarted => Err(ApiError::not_found(
            "Decoding stream have not started yet.",
        )),
        SpliceOutcome::Playlist(body) => Ok((
            [
                (header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            body,
        )
            .into_response()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_video_names() {
        for name in ["lot", "lot.v2", "my video", "..lot"] {
            assert!(is_plain_name(name), "{name}");
        }
        for name in [
            "", ".", "..", "../lot", "lot/..", "a/b", "/etc", "..\\lot", "lot\\x",
        ] {
            assert!(!is_plain_name(name), "{name}");
        }
    }
}
