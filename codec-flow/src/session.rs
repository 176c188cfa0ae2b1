//! Per-session flow sets.
//!
//! A session is keyed by an opaque string (the video base name in practice)
//! and owns exactly one encode, decode and vector search flow.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::flow::{DecodeFlow, DecodeKind, EncodeFlow, EncodeKind, Flow, SearchFlow, SearchKind};

/// Extensions recognised as source videos, with their content types.
const VIDEO_EXTENSIONS: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("avi", "video/x-msvideo"),
    ("mov", "video/quicktime"),
    ("mkv", "video/x-matroska"),
    ("webm", "video/webm"),
];

/// One client session.
pub struct Session {
    key: String,
    created_at: DateTime<Utc>,
    video: Mutex<Option<String>>,
    pub encode: EncodeFlow,
    pub decode: DecodeFlow,
    pub search: SearchFlow,
}

impl Session {
    fn new(key: String, kinds: &FlowKinds) -> Self {
        Self {
            encode: Flow::new(kinds.encode.clone()).with_session(&key),
            decode: Flow::new(kinds.decode.clone()).with_session(&key),
            search: Flow::new(kinds.search.clone()).with_session(&key),
            created_at: Utc::now(),
            video: Mutex::new(None),
            key,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Base name of the video this session works on.
    pub fn video(&self) -> Option<String> {
        self.video.lock().clone()
    }

    /// Point the session at `video`. When it differs from the current one,
    /// every flow is reset first. Returns whether a reset happened.
    pub async fn switch_video(&self, video: &str) -> bool {
        let changed = self.video.lock().as_deref() != Some(video);
        if changed {
            info!(session = %self.key, video, "Switching video, resetting flows");
            self.reset_flows().await;
        }
        *self.video.lock() = Some(video.to_string());
        changed
    }

    /// Reset encode, decode and search. The video name is kept.
    pub async fn reset_encode_chain(&self) {
        self.reset_flows().await;
    }

    /// Reset decode and search, which consumes decode output.
    pub async fn reset_decode_chain(&self) {
        self.decode.reset().await;
        self.search.reset().await;
    }

    async fn reset_flows(&self) {
        self.encode.reset().await;
        self.decode.reset().await;
        self.search.reset().await;
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            key: self.key.clone(),
            video: self.video(),
            created_at: self.created_at,
            encode: self.encode.state().as_str(),
            decode: self.decode.state().as_str(),
            search: self.search.state().as_str(),
        }
    }
}

/// Client-facing description of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub key: String,
    pub video: Option<String>,
    pub created_at: DateTime<Utc>,
    pub encode: &'static str,
    pub decode: &'static str,
    pub search: &'static str,
}

/// Prototype kinds cloned into every new session.
#[derive(Debug, Clone)]
pub struct FlowKinds {
    pub encode: EncodeKind,
    pub decode: DecodeKind,
    pub search: SearchKind,
}

impl FlowKinds {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            encode: EncodeKind::from_config(config),
            decode: DecodeKind::from_config(config),
            search: SearchKind::from_config(config),
        }
    }
}

/// Concurrent map of session key to [`Session`].
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    kinds: FlowKinds,
}

impl SessionRegistry {
    pub fn new(kinds: FlowKinds) -> Self {
        Self {
            sessions: DashMap::new(),
            kinds,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(FlowKinds::from_config(config))
    }

    pub fn get(&self, key: &str) -> Option<Arc<Session>> {
        self.sessions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn get_or_create(&self, key: &str) -> Arc<Session> {
        let entry = self.sessions.entry(key.to_string()).or_insert_with(|| {
            debug!(session = key, "Creating session");
            Arc::new(Session::new(key.to_string(), &self.kinds))
        });
        Arc::clone(entry.value())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// All sessions, sorted by key.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<_> = self
            .snapshot()
            .iter()
            .map(|session| session.summary())
            .collect();
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        summaries
    }

    /// First session, by key order, whose current video is `video`.
    pub fn find_by_video(&self, video: &str) -> Option<Arc<Session>> {
        let mut matches: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter(|session| session.video().as_deref() == Some(video))
            .collect();
        matches.sort_by(|a, b| a.key.cmp(&b.key));
        matches.into_iter().next()
    }

    /// Remove a session, stopping everything it runs.
    pub async fn remove(&self, key: &str) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(key)?;
        session.reset_flows().await;
        info!(session = key, "Session removed");
        Some(session)
    }

    /// Reset every flow of every session.
    pub async fn reset_all(&self) {
        for session in self.snapshot() {
            session.reset_flows().await;
        }
    }

    /// Clone out the sessions so no map guard is held across an await.
    fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

/// A source video found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoFile {
    pub filename: String,
    pub saved_path: PathBuf,
    pub content_type: &'static str,
    pub file_size: u64,
}

/// Base name of an uploaded file name (`clip.mp4` -> `clip`).
pub fn video_base_name(filename: &str) -> Option<String> {
    Path::new(filename)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
}

/// Look for the source video of `base_name` under `data_dir/base_name`.
pub async fn find_video_file(data_dir: &Path, base_name: &str) -> Option<VideoFile> {
    let video_dir = data_dir.join(base_name);
    let mut entries = tokio::fs::read_dir(&video_dir).await.ok()?;

    let mut found = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let Some(content_type) = video_content_type(&path) else {
            continue;
        };
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if meta.is_file() {
            found.push(VideoFile {
                filename: entry.file_name().to_string_lossy().into_owned(),
                saved_path: path,
                content_type,
                file_size: meta.len(),
            });
        }
    }
    // Directory order is unspecified.
    found.sort_by(|a, b| a.filename.cmp(&b.filename));
    found.into_iter().next()
}

fn video_content_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    VIDEO_EXTENSIONS
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, content_type)| *content_type)
}
