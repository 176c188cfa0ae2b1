//! Supervised external jobs.
//!
//! A [`Flow`] owns one [`JobRecord`] and at most one worker task. The worker
//! spawns the process described by the flow's [`FlowKind`], feeds every JSON
//! line of its merged output into the record, and tears the process down on
//! every exit path.

pub mod decode;
pub mod encode;
pub mod event;
pub mod kind;
pub mod record;
mod runner;
pub mod search;
pub mod supervisor;

pub use decode::{DecodeKind, DecodeState};
pub use encode::{EncodeKind, EncodeMetadata, EncodeState};
pub use event::FlowEvent;
pub use kind::{CommandSpec, FlowKind, ReportedTimes, ScriptEnv};
pub use record::{FlowStatus, JobRecord, JobState};
pub use search::{PreprocessingInfo, SearchArgs, SearchKind, SearchState};
pub use supervisor::{Flow, StartOutcome};

pub type DecodeFlow = Flow<DecodeKind>;
pub type EncodeFlow = Flow<EncodeKind>;
pub type SearchFlow = Flow<SearchKind>;
