//! Router tests driven through `tower::ServiceExt::oneshot`.

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use codec_flow::api::AppState;
use codec_flow::api::routes::create_router;
use codec_flow::config::AppConfig;
use codec_flow::session::SessionRegistry;

struct TestApp {
    router: Router,
    state: AppState,
    data_dir: TempDir,
}

impl TestApp {
    fn new() -> Self {
        let data_dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            data_dir: data_dir.path().to_path_buf(),
            raw_video_dir: data_dir.path().join("raw"),
            model_dir: data_dir.path().join("models"),
            ..AppConfig::default()
        };
        let sessions = Arc::new(SessionRegistry::from_config(&config));
        let state = AppState::new(sessions, data_dir.path());
        Self {
            router: create_router(state.clone()),
            state,
            data_dir,
        }
    }

    fn path(&self) -> &Path {
        self.data_dir.path()
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::get(uri).body(Body::empty()).unwrap();
        let (status, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    async fn post_json(&self, uri: &str, payload: Value) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let (status, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    /// Put an uploaded video on disk and open a session for it.
    async fn open_session(&self, video: &str) -> String {
        let dir = self.path().join(video);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join(format!("{video}.mp4")), b"not really a video")
            .await
            .unwrap();

        let (status, body) = self
            .post_json("/api/sessions", json!({ "filename": format!("{video}.mp4") }))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["key"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app.get_json("/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn test_logging_unavailable_without_subscriber() {
    let app = TestApp::new();
    let (status, body) = app.get_json("/api/logging").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["code"].is_string());
}

#[tokio::test]
async fn test_open_session_requires_upload() {
    let app = TestApp::new();
    let (status, body) = app
        .post_json("/api/sessions", json!({ "filename": "lot.mp4" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .contains("Please upload the video first")
    );
    assert!(app.state.sessions.is_empty());
}

#[tokio::test]
async fn test_open_and_inspect_session() {
    let app = TestApp::new();
    let key = app.open_session("lot").await;
    assert_eq!(key, "lot");

    let (status, body) = app.get_json("/api/sessions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["video"], "lot");

    let (status, body) = app.get_json("/api/sessions/lot/decode").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"]["state"], "idle");
    assert_eq!(body["progress"], Value::Null);
    assert_eq!(body["start_time"], Value::Null);

    let (status, body) = app.get_json("/api/sessions/lot/search/results").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "no_results");
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let app = TestApp::new();
    for uri in [
        "/api/sessions/missing",
        "/api/sessions/missing/encode",
        "/api/sessions/missing/decode",
        "/api/sessions/missing/search",
    ] {
        let (status, body) = app.get_json(uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["message"], "No session found for key 'missing'");
    }
}

#[tokio::test]
async fn test_start_with_missing_checkpoint_is_rejected() {
    let app = TestApp::new();
    app.open_session("lot").await;

    let (status, body) = app.post_json("/api/sessions/lot/decode", json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .contains("Checkpoint file not found")
    );

    let session = app.state.sessions.get("lot").unwrap();
    assert!(!session.decode.is_running());
}

#[tokio::test]
async fn test_start_unknown_scene_is_rejected() {
    let app = TestApp::new();
    app.open_session("holiday").await;

    let (status, body) = app
        .post_json("/api/sessions/holiday/encode", json!({ "filename": "holiday" }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .ends_with("No mapping found for filename: holiday")
    );
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_delete_session() {
    let app = TestApp::new();
    app.open_session("lot").await;

    let request = Request::delete("/api/sessions/lot")
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.state.sessions.get("lot").is_none());
}

#[tokio::test]
async fn test_playlist_before_decode_started() {
    let app = TestApp::new();
    app.open_session("lot").await;

    let (status, body) = app.get_json("/hls/lot/decoded/stream.m3u8?key=lot").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Decoding stream have not started yet.");
}

#[tokio::test]
async fn test_playlist_requires_session() {
    let app = TestApp::new();
    let (status, _) = app.get_json("/hls/lot/decoded/stream.m3u8").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.get_json("/hls/lot/decoded/stream.m3u8?key=other").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_playlist_is_spliced() {
    let app = TestApp::new();
    app.open_session("lot").await;

    let decoded = app.path().join("lot").join("decoded");
    tokio::fs::create_dir_all(&decoded).await.unwrap();
    tokio::fs::write(
        decoded.join("TreeA_output.m3u8"),
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:0\n\
         #EXTINF:4.0,\nTreeA_000.ts\n#EXTINF:4.0,\nTreeA_001.ts\n#EXT-X-ENDLIST\n",
    )
    .await
    .unwrap();
    tokio::fs::write(
        decoded.join("TreeB_output.m3u8"),
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\nTreeB_000.ts\n",
    )
    .await
    .unwrap();
    tokio::fs::write(decoded.join("TreeA_000.ts"), b"segment")
        .await
        .unwrap();

    // Without a key the session is found by its video.
    let request = Request::get("/hls/lot/decoded/stream.m3u8")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/vnd.apple.mpegurl"
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.starts_with("#EXTM3U"));
    assert!(text.contains("#EXT-X-DISCONTINUITY"));
    assert_eq!(
        text.lines().filter(|line| *line == "#EXT-X-ENDLIST").count(),
        1
    );
    assert!(text.trim_end().ends_with("#EXT-X-ENDLIST"));

    let segments: Vec<&str> = text.lines().filter(|line| line.ends_with(".ts")).collect();
    assert_eq!(segments, ["TreeA_000.ts", "TreeA_001.ts", "TreeB_000.ts"]);

    match m3u8_rs::parse_media_playlist_res(text.as_bytes()) {
        Ok(playlist) => assert_eq!(playlist.segments.len(), 3),
        Err(e) => panic!("merged playlist does not parse: {e:?}"),
    }

    // Segments themselves come straight from the data directory.
    let (status, body) = app
        .send(
            Request::get("/hls/lot/decoded/TreeA_000.ts")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"segment");
}

#[tokio::test]
async fn test_playlist_rejects_path_traversal() {
    let app = TestApp::new();
    app.open_session("lot").await;

    for uri in [
        "/hls/..%2F..%2Fetc/decoded/stream.m3u8?key=lot",
        "/hls/lot%2F..%2F..%2Fetc/decoded/stream.m3u8?key=lot",
        "/hls/..%5Clot/decoded/stream.m3u8?key=lot",
        "/hls/%2E%2E/decoded/stream.m3u8?key=lot",
    ] {
        let (status, body) = app.get_json(uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["message"], "Invalid video name");
    }
}
