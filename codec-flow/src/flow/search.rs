//! Vector search job: finds frames of a scene that match query images.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event::FlowEvent;
use super::kind::{CommandSpec, FlowKind, ScriptEnv, require_file};
use crate::config::AppConfig;
use crate::error::FlowError;

const SEARCH_SCRIPT: &str = "integration_example.py";

/// Frame timestamps in results are indices into a 7 fps sample of a 30 fps
/// source.
pub const TIMESTAMP_SCALE: f64 = 30.0 / 7.0;

/// Input for one search.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchArgs {
    /// Scene to search in.
    pub video: String,
    /// Query images, in order.
    pub images: Vec<PathBuf>,
}

/// What the script reported after indexing the video.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreprocessingInfo {
    pub video_id: Option<Value>,
    pub duration_seconds: Option<Value>,
    pub processed_frames: Option<Value>,
    pub resolution: Option<Value>,
}

#[derive(Debug, Default, Clone)]
pub struct SearchState {
    preprocessing: PreprocessingInfo,
    results: Vec<FlowEvent>,
}

impl SearchState {
    pub fn results(&self) -> &[FlowEvent] {
        &self.results
    }

    pub fn preprocessing(&self) -> &PreprocessingInfo {
        &self.preprocessing
    }
}

/// Copy `results` with every `top_results[].timestamp` rescaled to source
/// frame time. Entries without a numeric timestamp are copied unchanged.
pub fn scaled_results(results: &[FlowEvent]) -> Vec<Value> {
    results
        .iter()
        .map(|result| {
            let mut map = result.as_map().clone();
            if let Some(Value::Array(top)) = map.get_mut("top_results") {
                for entry in top.iter_mut() {
                    if let Some(timestamp) = entry.get_mut("timestamp")
                        && let Some(raw) = timestamp.as_f64()
                    {
                        *timestamp = Value::from(raw * TIMESTAMP_SCALE);
                    }
                }
            }
            Value::Object(map)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct SearchKind {
    env: ScriptEnv,
    timeout: Duration,
}

impl SearchKind {
    pub fn new(env: ScriptEnv, timeout: Duration) -> Self {
        Self { env, timeout }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(ScriptEnv::from_config(config), config.search_timeout)
    }
}

impl FlowKind for SearchKind {
    type Args = SearchArgs;
    type State = SearchState;
    type Metadata = PreprocessingInfo;

    fn name(&self) -> &'static str {
        "VectorSearchFlow"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn validate(&self, args: &SearchArgs) -> Result<(), FlowError> {
        if args.video.is_empty() {
            return Err(FlowError::validation("Video source is required"));
        }
        if args.images.is_empty() {
            return Err(FlowError::validation("Image sources list is required"));
        }
        let paths = self.env.scene(&args.video, "video")?;
        require_file(&paths.raw_path, "Video file")?;
        for image in &args.images {
            require_file(image, "Image file")?;
        }
        Ok(())
    }

    fn build_command(&self, args: &SearchArgs) -> Result<CommandSpec, FlowError> {
        let paths = self.env.scene(&args.video, "video")?;
        Ok(self
            .env
            .script(SEARCH_SCRIPT)
            .arg("video")
            .arg(paths.raw_path.to_string_lossy())
            .args(args.images.iter().map(|image| image.to_string_lossy())))
    }

    fn on_event(&self, state: &mut SearchState, event: &FlowEvent, _log: &[FlowEvent]) {
        match event.event_type() {
            Some("vector_search_preprocessing") => {
                state.preprocessing = PreprocessingInfo {
                    video_id: event.value("video_id"),
                    duration_seconds: event.value("duration_seconds"),
                    processed_frames: event.value("processed_frames"),
                    resolution: event.value("resolution"),
                };
            }
            Some("vector_search_ended") => state.results.push(event.clone()),
            _ => {}
        }
    }

    fn metadata(&self, state: &SearchState) -> Option<PreprocessingInfo> {
        Some(state.preprocessing.clone())
    }
}
