//! Shared state of one job.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::event::FlowEvent;
use super::kind::FlowKind;
use crate::error::FlowError;

/// Lifecycle of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Finished,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

/// Everything a poller can observe about a job.
///
/// The worker is the only writer while `state` is `Running`; once the
/// record leaves `Running` the event log is frozen until `clear`.
#[derive(Debug, Default)]
pub struct JobRecord<S> {
    pub(crate) state: JobState,
    pub(crate) events: Vec<FlowEvent>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) ended_at: Option<DateTime<Utc>>,
    pub(crate) last_error: Option<FlowError>,
    pub(crate) derived: S,
}

impl<S: Default> JobRecord<S> {
    pub fn new() -> Self {
        Self {
            state: JobState::Idle,
            events: Vec::new(),
            started_at: None,
            ended_at: None,
            last_error: None,
            derived: S::default(),
        }
    }

    /// Drop everything from a previous run and flip to `Running`.
    pub(crate) fn begin(&mut self) {
        self.clear();
        self.state = JobState::Running;
    }

    pub(crate) fn mark_spawned(&mut self, at: DateTime<Utc>) {
        if self.state == JobState::Running {
            self.started_at = Some(at);
        }
    }

    /// Append `event` and fold it into the derived state.
    ///
    /// Returns `false` without touching anything when the record is not
    /// running, so late lines from a torn-down worker cannot leak into a
    /// fresh run.
    pub(crate) fn ingest<K>(&mut self, kind: &K, event: FlowEvent) -> bool
    where
        K: FlowKind<State = S>,
    {
        if self.state != JobState::Running {
            return false;
        }
        self.events.push(event);
        if let Some(last) = self.events.last() {
            kind.on_event(&mut self.derived, last, &self.events);
        }
        true
    }

    /// Close the run. A record that is no longer running is left as is.
    pub(crate) fn finish(
        &mut self,
        outcome: Result<(), FlowError>,
        at: DateTime<Utc>,
    ) -> JobState {
        if self.state != JobState::Running {
            return self.state;
        }
        self.ended_at = Some(at);
        match outcome {
            Ok(()) => {
                self.state = JobState::Finished;
            }
            Err(err) => {
                self.last_error = Some(err);
                self.state = JobState::Failed;
            }
        }
        self.state
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn events(&self) -> &[FlowEvent] {
        &self.events
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn last_error(&self) -> Option<&FlowError> {
        self.last_error.as_ref()
    }

    /// Kind-specific fields derived from the event log.
    pub fn derived(&self) -> &S {
        &self.derived
    }

    /// Wall-clock run time, up to now while still running.
    pub fn duration_secs(&self, now: DateTime<Utc>) -> Option<f64> {
        let start = self.started_at?;
        let end = self.ended_at.unwrap_or(now);
        Some((end - start).num_milliseconds().max(0) as f64 / 1000.0)
    }
}

/// Point-in-time view of a job, as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowStatus {
    pub flow: &'static str,
    pub state: JobState,
    pub is_running: bool,
    pub is_finished: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub progress_percent: Option<f64>,
    pub eta_seconds: Option<f64>,
    pub event_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
