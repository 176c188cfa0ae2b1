//! Encode job: compresses a raw scene into its sparse representation.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::event::{FlowEvent, find_by_type, find_keyed_value};
use super::kind::{CommandSpec, FlowKind, ReportedTimes, ScriptEnv, require_file};
use crate::config::AppConfig;
use crate::error::FlowError;

const POINT_QUERY_TYPE: &str = "encode";

/// Aggregated result of an encode run.
///
/// Every field is present in the serialized form; anything the script did
/// not report is `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EncodeMetadata {
    pub device_used: Option<Value>,
    pub target_size: Option<Value>,
    pub reconstruction_size: Option<Value>,
    pub low_rank_approximation_psnr: Option<Value>,
    pub mask_density_actual_target: Option<Value>,
    pub start_time: Option<Value>,
    pub end_time: Option<Value>,
    pub dataset_creation_time_s: Option<Value>,
    pub memory_usage_bytes: Option<Value>,
    pub video_frames: Option<Value>,
    pub valid_sequences: Option<Value>,
    pub duration_s: Option<Value>,
    pub fps: Option<Value>,
    pub method: Option<Value>,
    pub bitrate_kbps: Option<Value>,
    pub codec_output: Option<Value>,
    pub compression_ratio: Option<Value>,
}

impl EncodeMetadata {
    /// Build from the full event log plus the script-reported times.
    pub fn from_events(
        events: &[FlowEvent],
        start_time: Option<Value>,
        end_time: Option<Value>,
    ) -> Self {
        let point = |key: &str| find_keyed_value(events, POINT_QUERY_TYPE, key, None);
        let end = find_by_type(events, "encode_end");
        let field = |name: &str| end.and_then(|event| event.value(name));

        Self {
            device_used: point("device_used"),
            target_size: point("target_size"),
            reconstruction_size: find_keyed_value(
                events,
                POINT_QUERY_TYPE,
                "target_size",
                Some("reconstruction_size"),
            ),
            low_rank_approximation_psnr: point("low_rank_approximation_psnr"),
            mask_density_actual_target: point("mask_density_actual_target"),
            start_time,
            end_time,
            dataset_creation_time_s: field("dataset_creation_time_s"),
            memory_usage_bytes: field("memory_usage_bytes"),
            video_frames: field("video_frames"),
            valid_sequences: field("valid_sequences"),
            duration_s: field("duration_s"),
            fps: field("fps"),
            method: field("method"),
            bitrate_kbps: field("bitrate_kbps"),
            codec_output: field("codec_output"),
            compression_ratio: field("compression_ratio"),
        }
    }

    /// Encode time in seconds, as reported by the script.
    pub fn encode_time(&self) -> Option<f64> {
        self.duration_s.as_ref().and_then(Value::as_f64)
    }
}

#[derive(Debug, Default, Clone)]
pub struct EncodeState {
    reported_start: Option<Value>,
    reported_end: Option<Value>,
    metadata: Option<EncodeMetadata>,
}

impl EncodeState {
    pub fn reported_times(&self) -> ReportedTimes {
        ReportedTimes {
            start_time: self.reported_start.clone(),
            end_time: self.reported_end.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncodeKind {
    env: ScriptEnv,
    results_dir: PathBuf,
    timeout: Duration,
}

impl EncodeKind {
    pub fn new(env: ScriptEnv, results_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            env,
            results_dir: results_dir.into(),
            timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            ScriptEnv::from_config(config),
            &config.results_dir,
            config.encode_timeout,
        )
    }
}

impl FlowKind for EncodeKind {
    /// Video base name.
    type Args = String;
    type State = EncodeState;
    type Metadata = EncodeMetadata;

    fn name(&self) -> &'static str {
        "EncodeFlow"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn validate(&self, video: &String) -> Result<(), FlowError> {
        if video.is_empty() {
            return Err(FlowError::validation("Filename is required for encode"));
        }
        let paths = self.env.scene(video, "filename")?;
        require_file(&paths.model_path, "Checkpoint file")?;
        require_file(&paths.raw_path, "Raw video file")
    }

    fn build_command(&self, video: &String) -> Result<CommandSpec, FlowError> {
        let paths = self.env.scene(video, "filename")?;
        Ok(self.env.inference(&paths, &self.results_dir, "encode"))
    }

    fn on_event(&self, state: &mut EncodeState, event: &FlowEvent, log: &[FlowEvent]) {
        match event.event_type() {
            Some("encode_start") => state.reported_start = event.value("start_time"),
            Some("encode_end") => {
                state.reported_end = event.value("end_time");
                state.metadata = Some(EncodeMetadata::from_events(
                    log,
                    state.reported_start.clone(),
                    state.reported_end.clone(),
                ));
            }
            _ => {}
        }
    }

    fn metadata(&self, state: &EncodeState) -> Option<EncodeMetadata> {
        state.metadata.clone()
    }
}
