//! Decode job: rebuilds a video from its sparse representation and writes
//! two HLS tracks (`TreeA`, `TreeB`) under the video's data directory.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use super::event::FlowEvent;
use super::kind::{CommandSpec, FlowKind, ReportedTimes, ScriptEnv, require_file};
use crate::config::AppConfig;
use crate::error::FlowError;

/// Progress percentage at or above which decode is reported as complete.
const COMPLETE_THRESHOLD: f64 = 99.1;

/// One `(time, TreeA + TreeB)` observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    pub time: f64,
    pub batch_sum: u64,
}

/// Which decoder track an event reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Track {
    TreeA,
    TreeB,
}

impl Track {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "TreeA" => Some(Self::TreeA),
            "TreeB" => Some(Self::TreeB),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct DecodeState {
    tree_a: u64,
    tree_b: u64,
    total_batches: Option<u64>,
    samples: Vec<ProgressSample>,
    reported_start: Option<Value>,
    reported_end: Option<Value>,
    metadata: Option<FlowEvent>,
}

impl DecodeState {
    pub fn batch_sum(&self) -> u64 {
        self.tree_a.saturating_add(self.tree_b)
    }

    pub fn total_batches(&self) -> Option<u64> {
        self.total_batches
    }

    pub fn samples(&self) -> &[ProgressSample] {
        &self.samples
    }

    pub fn reported_times(&self) -> ReportedTimes {
        ReportedTimes {
            start_time: self.reported_start.clone(),
            end_time: self.reported_end.clone(),
        }
    }

    fn on_batch(&mut self, event: &FlowEvent) {
        // The sample needs a timestamp; without one the whole event is dropped.
        let Some(time) = event.f64_field("time") else {
            return;
        };
        let batch_index = match event.get("batch_index") {
            None | Some(Value::Null) => 0,
            Some(_) => match event.u64_field("batch_index") {
                Some(index) => index,
                None => return,
            },
        };
        let total_batches = match event.get("total_batches") {
            None | Some(Value::Null) => 0,
            Some(_) => match event.u64_field("total_batches") {
                Some(total) => total,
                None => return,
            },
        };

        match event.str_field("tree_name").and_then(Track::parse) {
            Some(Track::TreeA) => self.tree_a = batch_index,
            Some(Track::TreeB) => self.tree_b = batch_index,
            None => {}
        }
        self.total_batches = Some(total_batches);
        self.samples.push(ProgressSample {
            time,
            batch_sum: self.batch_sum(),
        });
    }
}

/// Completion percentage for `batch_sum` units out of `2 * total_batches`.
///
/// Rounded to two decimals; anything from 99.1 up reads as 100.0.
pub fn decode_percent(batch_sum: u64, total_batches: Option<u64>) -> Option<f64> {
    let total = combined_units(total_batches)?;
    let percent = round_to(100.0 * batch_sum as f64 / total, 2);
    if percent >= COMPLETE_THRESHOLD {
        Some(100.0)
    } else {
        Some(percent)
    }
}

/// Remaining seconds, extrapolated from the average rate between the first
/// and the last sample. Rounded to one decimal.
pub fn decode_eta(samples: &[ProgressSample], total_batches: Option<u64>) -> Option<f64> {
    let total = combined_units(total_batches)?;
    if samples.len() < 2 {
        return None;
    }
    let first = samples.first()?;
    let last = samples.last()?;

    let batch_delta = last.batch_sum as f64 - first.batch_sum as f64;
    let time_delta = last.time - first.time;
    if batch_delta <= 0.0 || time_delta <= 0.0 {
        return None;
    }

    let per_batch = time_delta / batch_delta;
    let remaining = total - last.batch_sum as f64;
    Some(round_to((remaining * per_batch).max(0.0), 1))
}

/// Both tracks together; counted in floating point since the script controls
/// `total_batches`.
fn combined_units(total_batches: Option<u64>) -> Option<f64> {
    total_batches.filter(|t| *t > 0).map(|t| t as f64 * 2.0)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Debug, Clone)]
pub struct DecodeKind {
    env: ScriptEnv,
    data_dir: PathBuf,
    timeout: Duration,
}

impl DecodeKind {
    pub fn new(env: ScriptEnv, data_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        let data_dir = data_dir.into();
        // The script runs from the codec root, so relative paths would move.
        let data_dir = std::path::absolute(&data_dir).unwrap_or(data_dir);
        Self {
            env,
            data_dir,
            timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            ScriptEnv::from_config(config),
            &config.data_dir,
            config.decode_timeout,
        )
    }

    /// Where decoded output for `video` is written.
    pub fn output_dir(&self, video: &str) -> PathBuf {
        self.data_dir.join(video)
    }
}

impl FlowKind for DecodeKind {
    /// Video base name.
    type Args = String;
    type State = DecodeState;
    /// The `decode_end` event as emitted.
    type Metadata = FlowEvent;

    fn name(&self) -> &'static str {
        "DecodeFlow"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn validate(&self, video: &String) -> Result<(), FlowError> {
        if video.is_empty() {
            return Err(FlowError::validation("Filename is required for decode"));
        }
        let paths = self.env.scene(video, "filename")?;
        require_file(&paths.model_path, "Checkpoint file")?;
        require_file(&paths.raw_path, "Raw video file")
    }

    fn build_command(&self, video: &String) -> Result<CommandSpec, FlowError> {
        let paths = self.env.scene(video, "filename")?;
        Ok(self.env.inference(&paths, &self.output_dir(video), "decode"))
    }

    fn on_event(&self, state: &mut DecodeState, event: &FlowEvent, _log: &[FlowEvent]) {
        match event.event_type() {
            Some("decode_start") => state.reported_start = event.value("start_time"),
            Some("decode") => state.on_batch(event),
            Some("decode_end") => {
                state.reported_end = event.value("end_time");
                state.metadata = Some(event.clone());
            }
            _ => {}
        }
    }

    fn progress_percent(&self, state: &DecodeState) -> Option<f64> {
        decode_percent(state.batch_sum(), state.total_batches)
    }

    fn eta_seconds(&self, state: &DecodeState) -> Option<f64> {
        decode_eta(&state.samples, state.total_batches)
    }

    fn metadata(&self, state: &DecodeState) -> Option<FlowEvent> {
        state.metadata.clone()
    }
}
