//! Capability trait implemented by each job kind.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::event::FlowEvent;
use crate::catalog::{SceneCatalog, ScenePaths};
use crate::config::AppConfig;
use crate::error::FlowError;

const INFERENCE_SCRIPT: &str = "scripts/enhanced_multi_res_inference.py";
const INFERENCE_CONFIG: &str = "configs/enhanced_multi_res_codec.yaml";
const HD_WIDTH: &str = "1920";
const HD_HEIGHT: &str = "1080";
const BATCH_SIZE: &str = "4";
const VIDEO_QUALITY: &str = "high";

/// Program, arguments and working directory for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Start and end times as reported by the script itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportedTimes {
    pub start_time: Option<Value>,
    pub end_time: Option<Value>,
}

/// Per-kind rules plugged into the generic supervisor.
///
/// Implementations hold only configuration; all run state lives in
/// [`FlowKind::State`], which the supervisor keeps on the job record and
/// hands back under its lock.
pub trait FlowKind: Send + Sync + 'static {
    /// Caller input for `start`.
    type Args: Send + 'static;
    /// Derived fields updated as events arrive.
    type State: Default + Send + 'static;
    /// Aggregated record exposed by `metadata()`.
    type Metadata: Clone + Serialize + Send + 'static;

    /// Name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Budget for one run, measured from the start of output reading.
    fn timeout(&self) -> Duration;

    /// Reject unusable input before anything is spawned.
    fn validate(&self, args: &Self::Args) -> Result<(), FlowError>;

    /// Build the command line for a validated input.
    fn build_command(&self, args: &Self::Args) -> Result<CommandSpec, FlowError>;

    /// Fold one event into the derived state.
    ///
    /// `log` is the full event log, already including `event` as its last
    /// entry. Must not panic: malformed events are simply ignored.
    fn on_event(&self, state: &mut Self::State, event: &FlowEvent, log: &[FlowEvent]);

    /// Completion percentage in `0..=100`, `None` when indeterminate.
    fn progress_percent(&self, _state: &Self::State) -> Option<f64> {
        None
    }

    /// Estimated seconds to completion, `None` when indeterminate.
    fn eta_seconds(&self, _state: &Self::State) -> Option<f64> {
        None
    }

    fn metadata(&self, state: &Self::State) -> Option<Self::Metadata>;
}

/// How the codec scripts are launched.
#[derive(Debug, Clone)]
pub struct ScriptEnv {
    pub python_bin: String,
    pub codec_root: PathBuf,
    pub catalog: SceneCatalog,
}

impl ScriptEnv {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            python_bin: config.python_bin.clone(),
            codec_root: config.codec_root.clone(),
            catalog: SceneCatalog::from_config(config),
        }
    }

    /// A script invocation rooted at the codec checkout.
    pub fn script(&self, script: &str) -> CommandSpec {
        CommandSpec::new(&self.python_bin)
            .arg(script)
            .current_dir(&self.codec_root)
    }

    /// Resolve a scene or fail validation; `noun` names the input in the message.
    pub fn scene(&self, scene: &str, noun: &str) -> Result<ScenePaths, FlowError> {
        self.catalog
            .resolve(scene)
            .ok_or_else(|| FlowError::validation(format!("No mapping found for {noun}: {scene}")))
    }

    /// The shared inference script invocation for `flow` (`encode` or `decode`).
    pub fn inference(&self, paths: &ScenePaths, output_dir: &Path, flow: &str) -> CommandSpec {
        self.script(INFERENCE_SCRIPT)
            .arg("--config")
            .arg(INFERENCE_CONFIG)
            .arg("--checkpoint")
            .arg(paths.model_path.to_string_lossy())
            .arg("--video_path")
            .arg(paths.raw_path.to_string_lossy())
            .arg("--output-dir")
            .arg(output_dir.to_string_lossy())
            .args(["--hd-resolution", HD_WIDTH, HD_HEIGHT])
            .args(["--batch-size", BATCH_SIZE])
            .args(["--video-quality", VIDEO_QUALITY])
            .args(["--flow", flow])
    }
}

/// Fail validation unless `path` is an existing regular file.
pub fn require_file(path: &Path, description: &str) -> Result<(), FlowError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(FlowError::validation(format!(
            "{description} is not a file: {}",
            path.display()
        ))),
        Err(_) => Err(FlowError::validation(format!(
            "{description} not found: {}",
            path.display()
        ))),
    }
}
