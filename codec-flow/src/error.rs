//! Application-wide error types.

use std::time::Duration;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Failures of a supervised flow.
///
/// `Validation` and `AlreadyRunning` are returned from `start`; the others
/// happen inside the worker and are only ever stored on the job record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("Input validation failed: {0}")]
    Validation(String),

    #[error("{flow} already started and running")]
    AlreadyRunning { flow: &'static str },

    #[error("{flow} timed out after {} seconds", timeout.as_secs_f64())]
    ProcessTimeout {
        flow: &'static str,
        timeout: Duration,
    },

    #[error("Process exited with code {0}")]
    NonZeroExit(i32),

    #[error("{flow} execution failed: {cause}")]
    FlowExecutionFailed { flow: &'static str, cause: String },
}

impl FlowError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn execution(flow: &'static str, cause: impl std::fmt::Display) -> Self {
        Self::FlowExecutionFailed {
            flow,
            cause: cause.to_string(),
        }
    }

    /// Stable identifier for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::AlreadyRunning { .. } => "ALREADY_RUNNING",
            Self::ProcessTimeout { .. } => "PROCESS_TIMEOUT",
            Self::NonZeroExit(_) => "NON_ZERO_EXIT",
            Self::FlowExecutionFailed { .. } => "FLOW_EXECUTION_FAILED",
        }
    }
}
