//! Small process-related helpers shared across the workspace.
//!
//! - [`tokio_command`] builds a command that never pops a console window on Windows.
//! - [`spawn_merged`] starts a child whose stdout and stderr share one pipe.
//! - [`terminate`] runs the stop protocol used for every supervised child:
//!   ask politely, wait out a grace period, then kill and reap.

use std::ffi::OsStr;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Grace period granted to a child between the stop request and the kill.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Read end of the pipe a child writes both stdout and stderr into.
pub type MergedOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Spawn `cmd` with stdout and stderr redirected into a single pipe.
///
/// Both streams share one write end, so the returned reader yields bytes in
/// the order the child wrote them. stdin is closed. The command is consumed:
/// it holds the parent's copies of the write end, and the reader only sees
/// EOF once those are gone.
pub fn spawn_merged(mut cmd: Command) -> io::Result<(Child, MergedOutput)> {
    let (reader, writer) = io::pipe()?;
    cmd.stdin(Stdio::null())
        .stdout(writer.try_clone()?)
        .stderr(writer);

    let child = cmd.spawn()?;
    drop(cmd);

    Ok((child, into_async(reader)?))
}

#[cfg(unix)]
fn into_async(reader: io::PipeReader) -> io::Result<MergedOutput> {
    use std::os::fd::OwnedFd;
    use tokio::net::unix::pipe;

    let receiver = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
    Ok(Box::new(receiver))
}

#[cfg(not(unix))]
fn into_async(mut reader: io::PipeReader) -> io::Result<MergedOutput> {
    use std::io::Read;
    use tokio::io::AsyncWriteExt;

    // No async anonymous pipes here; pump from a blocking thread.
    let (rx, mut tx) = tokio::io::simplex(64 * 1024);
    let handle = tokio::runtime::Handle::current();
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 8192];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if handle.block_on(tx.write_all(&buf[..n])).is_err() {
                break;
            }
        }
    });
    Ok(Box::new(rx))
}

/// How a call to [`terminate`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The child had already exited before anything was sent.
    AlreadyExited,
    /// The child exited within the grace period after the stop request.
    Graceful,
    /// The child ignored the stop request and was killed.
    Killed,
}

/// Ask the child to stop without forcing it.
///
/// Sends `SIGTERM` on unix. Other platforms have no polite equivalent for an
/// arbitrary child, so this falls back to an immediate kill request.
pub fn request_stop(child: &mut Child) -> io::Result<()> {
    #[cfg(unix)]
    {
        let Some(pid) = child.id() else {
            // Already reaped.
            return Ok(());
        };
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        // SAFETY: `pid` belongs to a child we own and have not yet reaped, so it
        // cannot have been recycled for an unrelated process.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            // ESRCH: exited between the id() check and the signal.
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(err);
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        child.start_kill()
    }
}

/// Stop a child: request a graceful stop, wait up to `grace`, then kill and
/// wait unconditionally.
///
/// Closes the child's stdio handles that were not taken by the caller.
pub async fn terminate(child: &mut Child, grace: Duration) -> io::Result<Termination> {
    let pid = child.id();
    let outcome = terminate_inner(child, grace).await;

    drop(child.stdin.take());
    drop(child.stdout.take());
    drop(child.stderr.take());

    match &outcome {
        Ok(Termination::AlreadyExited) => debug!(?pid, "Child already exited"),
        Ok(Termination::Graceful) => info!(?pid, "Child stopped after stop request"),
        Ok(Termination::Killed) => warn!(?pid, "Child ignored stop request and was killed"),
        Err(e) => warn!(?pid, error = %e, "Failed to terminate child"),
    }

    outcome
}

async fn terminate_inner(child: &mut Child, grace: Duration) -> io::Result<Termination> {
    if child.try_wait()?.is_some() {
        return Ok(Termination::AlreadyExited);
    }

    if let Err(e) = request_stop(child) {
        warn!(error = %e, "Stop request failed, killing instead");
    } else {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(_)) => return Ok(Termination::Graceful),
            Ok(Err(e)) => return Err(e),
            Err(_) => {}
        }
    }

    // `kill` sends SIGKILL and then waits for the child to be reaped.
    child.kill().await?;
    Ok(Termination::Killed)
}
