//! End-to-end lifecycle tests for supervised flows.
//!
//! Each flow runs a real `sh` child, so these only build on unix.

#![cfg(unix)]

use std::path::PathBuf;
use std::time::{Duration, Instant};

use codec_flow::FlowError;
use codec_flow::catalog::SceneCatalog;
use codec_flow::flow::{
    CommandSpec, DecodeKind, DecodeState, Flow, FlowEvent, FlowKind, JobState, ScriptEnv,
    StartOutcome,
};

const WAIT: Duration = Duration::from_secs(15);

/// Decode progress tracking fed by a shell script instead of the decoder.
struct ShellDecode {
    inner: DecodeKind,
    timeout: Duration,
}

impl ShellDecode {
    fn new(timeout: Duration) -> Self {
        let env = ScriptEnv {
            python_bin: "python".to_string(),
            codec_root: PathBuf::from("."),
            catalog: SceneCatalog::builtin("/raw", "/models"),
        };
        Self {
            inner: DecodeKind::new(env, "/data", timeout),
            timeout,
        }
    }
}

impl FlowKind for ShellDecode {
    type Args = String;
    type State = DecodeState;
    type Metadata = FlowEvent;

    fn name(&self) -> &'static str {
        "ShellDecode"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn validate(&self, script: &String) -> Result<(), FlowError> {
        if script.trim().is_empty() {
            return Err(FlowError::validation("Script is required"));
        }
        Ok(())
    }

    fn build_command(&self, script: &String) -> Result<CommandSpec, FlowError> {
        Ok(CommandSpec::new("sh").arg("-c").arg(script.as_str()))
    }

    fn on_event(&self, state: &mut DecodeState, event: &FlowEvent, log: &[FlowEvent]) {
        self.inner.on_event(state, event, log);
    }

    fn progress_percent(&self, state: &DecodeState) -> Option<f64> {
        self.inner.progress_percent(state)
    }

    fn eta_seconds(&self, state: &DecodeState) -> Option<f64> {
        self.inner.eta_seconds(state)
    }

    fn metadata(&self, state: &DecodeState) -> Option<FlowEvent> {
        self.inner.metadata(state)
    }
}

fn flow(timeout: Duration) -> Flow<ShellDecode> {
    Flow::new(ShellDecode::new(timeout)).with_session("test")
}

const DECODE_SCRIPT: &str = r#"
echo '{"type":"decode_start","start_time":100.0}'
echo 'loading weights...'
echo '{"type":"decode","tree_name":"TreeA","batch_index":5,"total_batches":10,"time":100.0}'
echo '{"type":"decode","tree_name":"TreeB","batch_index":5,"total_batches":10,"time":110.0}' >&2
echo '{"type":"decode_end","end_time":120.0,"frames":300}'
"#;

#[tokio::test]
async fn test_decode_progress_through_flow() {
    let flow = flow(WAIT);
    assert_eq!(
        flow.start(DECODE_SCRIPT.to_string()).await,
        Ok(StartOutcome::Started)
    );
    assert!(flow.wait_for_completion(WAIT).await);

    assert_eq!(flow.state(), JobState::Finished);
    // The plain text line is not an event.
    assert_eq!(flow.events().len(), 4);
    assert_eq!(flow.progress_percent(), Some(50.0));
    assert_eq!(flow.eta_seconds(), Some(20.0));

    let metadata = flow.metadata().unwrap();
    assert_eq!(metadata.u64_field("frames"), Some(300));

    let status = flow.status();
    assert!(status.is_finished);
    assert!(!status.is_running);
    assert_eq!(status.event_count, 4);
    assert!(status.duration_secs.is_some());
}

#[tokio::test]
async fn test_double_start_is_rejected() {
    let flow = flow(WAIT);
    flow.start("sleep 30".to_string()).await.unwrap();
    assert!(flow.is_running());

    let err = flow.start("sleep 30".to_string()).await.unwrap_err();
    assert_eq!(err, FlowError::AlreadyRunning { flow: "ShellDecode" });
    assert!(flow.is_running());

    flow.reset().await;
}

#[tokio::test]
async fn test_reset_stops_running_process() {
    let flow = flow(WAIT);
    let script = r#"echo '{"type":"decode","tree_name":"TreeA","batch_index":1,"total_batches":4,"time":1.0}'; sleep 30"#;
    flow.start(script.to_string()).await.unwrap();

    // Give the script time to report its first batch.
    let deadline = Instant::now() + WAIT;
    while flow.events().is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(flow.progress_percent(), Some(12.5));

    let started = Instant::now();
    flow.reset().await;
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(flow.state(), JobState::Idle);
    assert!(!flow.has_worker());
    assert!(flow.events().is_empty());
    assert!(flow.started_at().is_none());
    assert!(flow.progress_percent().is_none());

    // Idempotent.
    flow.reset().await;
    assert_eq!(flow.state(), JobState::Idle);
}

#[tokio::test]
async fn test_timeout_fails_the_run() {
    let timeout = Duration::from_millis(300);
    let flow = flow(timeout);
    flow.start("sleep 30".to_string()).await.unwrap();

    assert!(flow.wait_for_completion(WAIT).await);
    assert_eq!(flow.state(), JobState::Failed);
    assert_eq!(
        flow.last_error(),
        Some(FlowError::ProcessTimeout {
            flow: "ShellDecode",
            timeout,
        })
    );
    assert_eq!(flow.status().error_code, Some("PROCESS_TIMEOUT"));
}

#[tokio::test]
async fn test_timeout_survives_ignored_sigterm() {
    let flow = flow(Duration::from_millis(200));
    // The shell ignores SIGTERM, so teardown has to escalate to a kill.
    flow.start("trap '' TERM; sleep 30".to_string())
        .await
        .unwrap();

    assert!(flow.wait_for_completion(WAIT).await);
    assert_eq!(flow.state(), JobState::Failed);
    assert_eq!(flow.status().error_code, Some("PROCESS_TIMEOUT"));
}

#[tokio::test]
async fn test_non_zero_exit_keeps_events() {
    let flow = flow(WAIT);
    let script = r#"echo '{"type":"decode_start","start_time":1.0}'; exit 7"#;
    flow.start(script.to_string()).await.unwrap();

    assert!(flow.wait_for_completion(WAIT).await);
    assert_eq!(flow.state(), JobState::Failed);
    assert_eq!(flow.last_error(), Some(FlowError::NonZeroExit(7)));
    assert_eq!(flow.events().len(), 1);
}

#[tokio::test]
async fn test_missing_program_fails_the_run() {
    struct Missing;

    impl FlowKind for Missing {
        type Args = ();
        type State = ();
        type Metadata = ();

        fn name(&self) -> &'static str {
            "MissingFlow"
        }

        fn timeout(&self) -> Duration {
            WAIT
        }

        fn validate(&self, _args: &()) -> Result<(), FlowError> {
            Ok(())
        }

        fn build_command(&self, _args: &()) -> Result<CommandSpec, FlowError> {
            Ok(CommandSpec::new("/nonexistent/codec-flow-test-binary"))
        }

        fn on_event(&self, _state: &mut (), _event: &FlowEvent, _log: &[FlowEvent]) {}

        fn metadata(&self, _state: &()) -> Option<()> {
            None
        }
    }

    let flow = Flow::new(Missing);
    flow.start(()).await.unwrap();
    assert!(flow.wait_for_completion(WAIT).await);

    assert_eq!(flow.state(), JobState::Failed);
    assert_eq!(flow.status().error_code, Some("FLOW_EXECUTION_FAILED"));
}

#[tokio::test]
async fn test_reset_then_rerun_is_reproducible() {
    let flow = flow(WAIT);

    flow.start(DECODE_SCRIPT.to_string()).await.unwrap();
    assert!(flow.wait_for_completion(WAIT).await);
    let first = (flow.events(), flow.metadata(), flow.progress_percent());

    // A finished run ignores further starts until reset.
    assert_eq!(
        flow.start(DECODE_SCRIPT.to_string()).await,
        Ok(StartOutcome::AlreadyFinished)
    );

    flow.reset().await;
    flow.start(DECODE_SCRIPT.to_string()).await.unwrap();
    assert!(flow.wait_for_completion(WAIT).await);
    let second = (flow.events(), flow.metadata(), flow.progress_percent());

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_interleaved_streams_keep_emission_order() {
    let flow = flow(WAIT);
    let script = r#"
i=0
while [ $i -lt 200 ]; do
    echo "{\"type\":\"seq\",\"i\":$i}"
    i=$((i+1))
    echo "{\"type\":\"seq\",\"i\":$i}" >&2
    i=$((i+1))
done
"#;
    flow.start(script.to_string()).await.unwrap();
    assert!(flow.wait_for_completion(WAIT).await);
    assert_eq!(flow.state(), JobState::Finished);

    let order: Vec<u64> = flow
        .events()
        .iter()
        .filter_map(|event| event.u64_field("i"))
        .collect();
    assert_eq!(order, (0..200).collect::<Vec<_>>());
}
