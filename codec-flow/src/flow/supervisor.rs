//! Generic job supervisor.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

use super::event::FlowEvent;
use super::kind::FlowKind;
use super::record::{FlowStatus, JobRecord, JobState};
use super::runner::{self, RunContext};
use crate::error::FlowError;

/// What `start` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new run was spawned.
    Started,
    /// The previous run finished cleanly; nothing was spawned.
    ///
    /// Callers that want to re-run a finished job must `reset` first.
    AlreadyFinished,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One job of kind `K`, startable, pollable and resettable.
///
/// Polling methods take the record lock once and never wait on the worker.
/// `start` and `reset` are serialized against each other.
pub struct Flow<K: FlowKind> {
    kind: Arc<K>,
    session: String,
    shared: Arc<Mutex<JobRecord<K::State>>>,
    control: tokio::sync::Mutex<Option<Worker>>,
    state_tx: Arc<watch::Sender<JobState>>,
}

impl<K: FlowKind> Flow<K> {
    pub fn new(kind: K) -> Self {
        let (state_tx, _) = watch::channel(JobState::Idle);
        Self {
            kind: Arc::new(kind),
            session: String::new(),
            shared: Arc::new(Mutex::new(JobRecord::new())),
            control: tokio::sync::Mutex::new(None),
            state_tx: Arc::new(state_tx),
        }
    }

    /// Tag log output of this flow with a session key.
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = session.into();
        self
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    /// Validate `args` and launch a run in the background.
    pub async fn start(&self, args: K::Args) -> Result<StartOutcome, FlowError> {
        let name = self.kind.name();
        let mut control = self.control.lock().await;

        let state = self.shared.lock().state();
        match state {
            JobState::Running => return Err(FlowError::AlreadyRunning { flow: name }),
            JobState::Finished => {
                // Restarting a clean run silently does nothing; a reset is required.
                info!(flow = name, session = %self.session, "Flow already completed successfully, start ignored");
                return Ok(StartOutcome::AlreadyFinished);
            }
            JobState::Idle | JobState::Failed => {}
        }

        self.kind.validate(&args)?;
        let command = self.kind.build_command(&args)?;

        // A failed worker has already recorded its outcome; reap it.
        if let Some(previous) = control.take() {
            self.reap(previous).await;
        }

        self.shared.lock().begin();
        self.state_tx.send_replace(JobState::Running);

        let cancel = CancellationToken::new();
        let ctx = RunContext {
            kind: Arc::clone(&self.kind),
            shared: Arc::clone(&self.shared),
            state_tx: Arc::clone(&self.state_tx),
            cancel: cancel.clone(),
        };
        let span = info_span!("flow", flow = name, session = %self.session);
        let handle = tokio::spawn(runner::run(ctx, command).instrument(span));

        *control = Some(Worker { cancel, handle });
        Ok(StartOutcome::Started)
    }

    /// Stop any live process and return the record to `Idle`.
    ///
    /// Waits for the worker's teardown to complete. Safe to call at any time,
    /// any number of times.
    pub async fn reset(&self) {
        let mut control = self.control.lock().await;
        if let Some(worker) = control.take() {
            worker.cancel.cancel();
            self.reap(worker).await;
        }
        self.shared.lock().clear();
        self.state_tx.send_replace(JobState::Idle);
    }

    async fn reap(&self, worker: Worker) {
        if let Err(e) = worker.handle.await
            && e.is_panic()
        {
            warn!(flow = self.kind.name(), session = %self.session, "Worker panicked: {}", e);
        }
    }

    /// Wait until the current run leaves `Running`.
    ///
    /// Returns `false` if `timeout` elapses first or nothing was started.
    pub async fn wait_for_completion(&self, timeout: Duration) -> bool {
        let mut rx = self.state_tx.subscribe();
        let finished = async {
            let result = rx.wait_for(|state| state.is_terminal()).await;
            result.is_ok()
        };
        tokio::time::timeout(timeout, finished)
            .await
            .unwrap_or(false)
    }

    /// `true` while a worker task is attached to this flow.
    pub fn has_worker(&self) -> bool {
        match self.control.try_lock() {
            Ok(control) => control.as_ref().is_some_and(|w| !w.handle.is_finished()),
            // Locked by an in-progress start or reset.
            Err(_) => true,
        }
    }

    /// Read the record under a single lock scope.
    pub fn with_record<R>(&self, f: impl FnOnce(&JobRecord<K::State>) -> R) -> R {
        f(&self.shared.lock())
    }

    pub fn state(&self) -> JobState {
        self.shared.lock().state()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().started_at()
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().ended_at()
    }

    pub fn is_running(&self) -> bool {
        self.state() == JobState::Running
    }

    /// `true` once a run ended, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn last_error(&self) -> Option<FlowError> {
        self.shared.lock().last_error().cloned()
    }

    /// Snapshot of the event log.
    pub fn events(&self) -> Vec<FlowEvent> {
        self.shared.lock().events().to_vec()
    }

    pub fn duration(&self) -> Option<f64> {
        self.shared.lock().duration_secs(Utc::now())
    }

    pub fn progress_percent(&self) -> Option<f64> {
        let record = self.shared.lock();
        self.kind.progress_percent(&record.derived)
    }

    pub fn eta_seconds(&self) -> Option<f64> {
        let record = self.shared.lock();
        self.kind.eta_seconds(&record.derived)
    }

    pub fn metadata(&self) -> Option<K::Metadata> {
        let record = self.shared.lock();
        self.kind.metadata(&record.derived)
    }

    pub fn status(&self) -> FlowStatus {
        let now = Utc::now();
        let record = self.shared.lock();
        let state = record.state();
        FlowStatus {
            flow: self.kind.name(),
            state,
            is_running: state == JobState::Running,
            is_finished: state.is_terminal(),
            started_at: record.started_at(),
            ended_at: record.ended_at(),
            duration_secs: record.duration_secs(now),
            progress_percent: self.kind.progress_percent(&record.derived),
            eta_seconds: self.kind.eta_seconds(&record.derived),
            event_count: record.events().len(),
            error_code: record.last_error().map(FlowError::code),
            last_error: record.last_error().map(ToString::to_string),
        }
    }
}

impl<K: FlowKind> Drop for Flow<K> {
    fn drop(&mut self) {
        // Dropping the handle detaches the task; cancel it so the child is
        // torn down instead of running to its timeout.
        if let Some(worker) = self.control.get_mut() {
            worker.cancel.cancel();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::flow::kind::CommandSpec;

    /// Runs an arbitrary shell script and counts `step` events.
    struct Script {
        timeout: Duration,
    }

    #[derive(Default)]
    struct Steps {
        count: u64,
    }

    impl FlowKind for Script {
        type Args = String;
        type State = Steps;
        type Metadata = u64;

        fn name(&self) -> &'static str {
            "ScriptFlow"
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        fn validate(&self, script: &String) -> Result<(), FlowError> {
            if script.is_empty() {
                return Err(FlowError::validation("Script is required"));
            }
            Ok(())
        }

        fn build_command(&self, script: &String) -> Result<CommandSpec, FlowError> {
            Ok(CommandSpec::new("sh").arg("-c").arg(script.as_str()))
        }

        fn on_event(&self, state: &mut Steps, event: &FlowEvent, _log: &[FlowEvent]) {
            match event.event_type() {
                Some("step") => state.count += 1,
                Some("crash") => panic!("crash event"),
                _ => {}
            }
        }

        fn metadata(&self, state: &Steps) -> Option<u64> {
            (state.count > 0).then_some(state.count)
        }
    }

    fn flow(timeout: Duration) -> Flow<Script> {
        Flow::new(Script { timeout })
    }

    const WAIT: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_successful_run() {
        let flow = flow(WAIT);
        let script = r#"echo '{"type":"step"}'; echo noise; echo '{"type":"step"}' >&2"#;

        assert_eq!(flow.start(script.to_string()).await, Ok(StartOutcome::Started));
        assert!(flow.wait_for_completion(WAIT).await);

        assert_eq!(flow.state(), JobState::Finished);
        assert_eq!(flow.events().len(), 2);
        assert_eq!(flow.metadata(), Some(2));
        assert!(flow.started_at().is_some());
        assert!(flow.ended_at().is_some());
        assert!(flow.last_error().is_none());
    }

    #[tokio::test]
    async fn test_validation_leaves_record_idle() {
        let flow = flow(WAIT);
        let err = flow.start(String::new()).await.unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
        assert_eq!(flow.state(), JobState::Idle);
        assert!(!flow.has_worker());
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let flow = flow(WAIT);
        flow.start("exit 3".to_string()).await.unwrap();
        assert!(flow.wait_for_completion(WAIT).await);

        assert_eq!(flow.state(), JobState::Failed);
        assert_eq!(flow.last_error(), Some(FlowError::NonZeroExit(3)));
        assert_eq!(flow.status().error_code, Some("NON_ZERO_EXIT"));
    }

    #[tokio::test]
    async fn test_finished_start_is_noop() {
        let flow = flow(WAIT);
        flow.start("true".to_string()).await.unwrap();
        assert!(flow.wait_for_completion(WAIT).await);

        let outcome = flow.start("exit 1".to_string()).await.unwrap();
        assert_eq!(outcome, StartOutcome::AlreadyFinished);
        assert_eq!(flow.state(), JobState::Finished);
    }

    #[tokio::test]
    async fn test_failed_run_can_restart() {
        let flow = flow(WAIT);
        flow.start("exit 1".to_string()).await.unwrap();
        assert!(flow.wait_for_completion(WAIT).await);
        assert_eq!(flow.state(), JobState::Failed);

        flow.start(r#"echo '{"type":"step"}'"#.to_string())
            .await
            .unwrap();
        assert!(flow.wait_for_completion(WAIT).await);
        assert_eq!(flow.state(), JobState::Finished);
        assert_eq!(flow.metadata(), Some(1));
    }

    #[tokio::test]
    async fn test_wait_without_start() {
        let flow = flow(WAIT);
        assert!(!flow.wait_for_completion(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_panicked_worker_is_reaped() {
        let flow = flow(WAIT);
        flow.start(r#"echo '{"type":"crash"}'; sleep 30"#.to_string())
            .await
            .unwrap();

        // The worker dies without recording an outcome.
        assert!(!flow.wait_for_completion(Duration::from_millis(300)).await);
        assert_eq!(flow.state(), JobState::Running);

        flow.reset().await;
        assert_eq!(flow.state(), JobState::Idle);
        assert!(!flow.has_worker());

        flow.start(r#"echo '{"type":"step"}'"#.to_string())
            .await
            .unwrap();
        assert!(flow.wait_for_completion(WAIT).await);
        assert_eq!(flow.state(), JobState::Finished);
        assert_eq!(flow.metadata(), Some(1));
    }
}
