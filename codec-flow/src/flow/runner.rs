//! Worker task driving one external process.

use std::process::ExitStatus;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use process_utils::{
    DEFAULT_GRACE_PERIOD, MergedOutput, Termination, spawn_merged, terminate, tokio_command,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::event::FlowEvent;
use super::kind::{CommandSpec, FlowKind};
use super::record::{JobRecord, JobState};
use crate::error::FlowError;

/// Everything the worker needs, shared with the owning [`super::Flow`].
pub(crate) struct RunContext<K: FlowKind> {
    pub kind: Arc<K>,
    pub shared: Arc<Mutex<JobRecord<K::State>>>,
    pub state_tx: Arc<watch::Sender<JobState>>,
    pub cancel: CancellationToken,
}

/// Run `command` to completion and record the outcome.
///
/// Never returns an error: every failure ends up on the job record.
pub(crate) async fn run<K: FlowKind>(ctx: RunContext<K>, command: CommandSpec) {
    let name = ctx.kind.name();
    info!(flow = name, command = %command, "Starting flow");

    let outcome = drive(&ctx, &command).await;

    let state = ctx.shared.lock().finish(outcome.clone(), Utc::now());
    ctx.state_tx.send_replace(state);

    match outcome {
        Ok(()) => info!(flow = name, "Flow finished"),
        Err(_) if ctx.cancel.is_cancelled() => info!(flow = name, "Flow stopped by reset"),
        Err(e) => error!(flow = name, code = e.code(), "Flow failed: {}", e),
    }
}

async fn drive<K: FlowKind>(ctx: &RunContext<K>, command: &CommandSpec) -> Result<(), FlowError> {
    let name = ctx.kind.name();

    let mut cmd = tokio_command(&command.program);
    cmd.args(&command.args).kill_on_drop(true);
    if let Some(dir) = &command.current_dir {
        cmd.current_dir(dir);
    }

    let (mut child, output) = spawn_merged(cmd).map_err(|e| {
        FlowError::execution(name, format!("failed to spawn {}: {}", command.program, e))
    })?;
    ctx.shared.lock().mark_spawned(Utc::now());
    info!(flow = name, pid = ?child.id(), "Process spawned");

    let result = supervise(ctx, &mut child, output).await;

    // Teardown runs on every path, including success where it only reaps.
    match terminate(&mut child, DEFAULT_GRACE_PERIOD).await {
        Ok(Termination::AlreadyExited) => {}
        Ok(how) => debug!(flow = name, termination = ?how, "Process torn down"),
        Err(e) => warn!(flow = name, "Failed to tear down process: {}", e),
    }

    result
}

/// Pump output into the record until EOF, then wait for exit.
///
/// stdout and stderr arrive through one pipe, so lines are ingested in the
/// order the child wrote them. The timeout budget covers both phases and
/// starts once reading begins. `output` is closed on return.
async fn supervise<K: FlowKind>(
    ctx: &RunContext<K>,
    child: &mut Child,
    output: MergedOutput,
) -> Result<(), FlowError> {
    let name = ctx.kind.name();
    let timeout = ctx.kind.timeout();
    let timed_out = || FlowError::ProcessTimeout {
        flow: name,
        timeout,
    };
    let reset = || FlowError::execution(name, "reset requested");

    let deadline = tokio::time::sleep_until(Instant::now() + timeout);
    tokio::pin!(deadline);

    let mut reader = BufReader::new(output);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(reset()),
            _ = &mut deadline => return Err(timed_out()),
            read = reader.read_until(b'\n', &mut buf) => match read {
                Ok(0) => break,
                // Invalid UTF-8 is replaced rather than treated as a read failure.
                Ok(_) => handle_line(ctx, &String::from_utf8_lossy(&buf)),
                Err(e) => {
                    return Err(FlowError::execution(name, format!("failed to read output: {e}")));
                }
            },
        }
    }
    drop(reader);

    let status: ExitStatus = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(reset()),
        _ = &mut deadline => return Err(timed_out()),
        status = child.wait() => status.map_err(|e| FlowError::execution(name, e))?,
    };

    if status.success() {
        Ok(())
    } else {
        // Death by signal has no exit code.
        Err(FlowError::NonZeroExit(status.code().unwrap_or(-1)))
    }
}

fn handle_line<K: FlowKind>(ctx: &RunContext<K>, line: &str) {
    match FlowEvent::parse_line(line) {
        Some(event) => {
            let kind = ctx.kind.as_ref();
            let event_type = event.event_type().unwrap_or("unknown").to_string();
            if ctx.shared.lock().ingest(kind, event) {
                debug!(flow = kind.name(), event_type = %event_type, "Processed event");
            }
        }
        None => {
            let line = line.trim();
            if !line.is_empty() {
                debug!(flow = ctx.kind.name(), "output: {}", line);
            }
        }
    }
}
