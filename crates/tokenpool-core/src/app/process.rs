//! External processes started on behalf of a task.
//!
//! The child is parked in a [`ChildSlot`] shared with the run loop while
//! it runs, so a shutdown can stop it before the task's final state is
//! written.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct ChildSlot {
    inner: Arc<Mutex<Option<Child>>>,
}

impl ChildSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_running(&self) -> bool {
        match self.inner.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn park(&self, child: Child) {
        let mut slot = self.inner.lock().await;
        if let Some(previous) = slot.as_mut()
            && matches!(previous.try_wait(), Ok(None))
        {
            warn!(pid = previous.id(), "previous child still running, no longer tracked");
        }
        *slot = Some(child);
    }

    async fn take(&self) -> Option<Child> {
        self.inner.lock().await.take()
    }

    /// SIGTERM the parked child, wait up to `grace`, then kill it.
    pub async fn terminate(&self, grace: Duration) {
        let Some(mut child) = self.take().await else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(%status, "child already exited");
                return;
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "could not poll child status"),
        }
        let Some(pid) = child.id() else {
            return;
        };

        info!(pid, grace_secs = grace.as_secs_f64(), "terminating child process");
        send_sigterm(pid).await;

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => info!(pid, %status, "child process exited"),
            Ok(Err(err)) => warn!(pid, error = %err, "failed waiting for child"),
            Err(_) => {
                warn!(pid, "child did not exit within grace period, killing");
                if let Err(err) = child.kill().await {
                    warn!(pid, error = %err, "failed to kill child");
                }
            }
        }
    }
}

async fn send_sigterm(pid: u32) {
    let result = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .status()
        .await;
    match result {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(pid, %status, "kill -TERM failed"),
        Err(err) => warn!(pid, error = %err, "could not run kill"),
    }
}

/// Captured result of [`ProcessContext::execute`].
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    /// Exit code, `None` when the process died from a signal.
    pub fn exit_code(&self) -> Option<i64> {
        self.status.code().map(i64::from)
    }
}

/// Handed to [`TaskProcessor::process`](super::TaskProcessor::process).
#[derive(Debug, Clone, Default)]
pub struct ProcessContext {
    child: ChildSlot,
}

impl ProcessContext {
    pub fn new(child: ChildSlot) -> Self {
        Self { child }
    }

    /// Run `command` to completion with captured stdout/stderr.
    ///
    /// If the run loop terminates the child while it runs, this returns an
    /// `Interrupted` error.
    pub async fn execute(&self, command: &mut Command) -> io::Result<ExecOutput> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command.spawn()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        debug!(pid = child.id(), "started child process");
        self.child.park(child).await;

        let captured = tokio::try_join!(read_all(stdout), read_all(stderr));
        let (stdout, stderr) = match captured {
            Ok(output) => output,
            Err(err) => {
                if let Some(mut child) = self.child.take().await {
                    let _ = child.kill().await;
                }
                return Err(err);
            }
        };

        let Some(mut child) = self.child.take().await else {
            return Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "child process was terminated",
            ));
        };
        let status = child.wait().await?;
        Ok(ExecOutput {
            status,
            stdout,
            stderr,
        })
    }
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}
