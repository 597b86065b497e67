use crate::error::ShimError;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};

/// A spawned guest process and the streams not yet handed to a console.
pub struct SandboxProcessHandle {
    child: Child,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    alive: Arc<AtomicBool>,
}

impl std::fmt::Debug for SandboxProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxProcessHandle")
            .field("pid", &self.pid)
            .field("alive", &self.alive.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SandboxProcessHandle {
    /// Wraps a child spawned with piped stdio.
    pub fn from_child(mut child: Child) -> Self {
        Self {
            pid: child.id(),
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Reaps the child if it already exited.
    pub fn is_alive(&mut self) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            return false;
        }

        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::debug!(pid = ?self.pid, status = %status, "Guest process exited");
                self.alive.store(false, Ordering::SeqCst);
                false
            }
            Err(e) => {
                tracing::warn!(pid = ?self.pid, "Failed to poll guest process: {}", e);
                self.alive.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Shared liveness flag, cleared once the process is known to be gone.
    pub fn liveness(&self) -> Arc<AtomicBool> {
        self.alive.clone()
    }

    pub(crate) fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub(crate) fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub(crate) fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Waits for the guest to exit on its own.
    pub async fn wait(&mut self) -> Result<ExitStatus, ShimError> {
        let status = self.child.wait().await?;
        self.alive.store(false, Ordering::SeqCst);
        Ok(status)
    }

    /// Sends SIGTERM, waits up to `grace`, then SIGKILLs and reaps.
    pub async fn terminate(&mut self, grace: Duration) -> Result<ExitStatus, ShimError> {
        // Dropping an unclaimed stdin lets a shell reading it exit on its own.
        self.stdin.take();

        if let Some(status) = self.child.try_wait()? {
            self.alive.store(false, Ordering::SeqCst);
            return Ok(status);
        }

        if let Some(pid) = self.pid {
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => tracing::debug!(pid = pid, "Sent SIGTERM to guest process"),
                Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => tracing::warn!(pid = pid, "Failed to send SIGTERM: {}", e),
            }
        }

        let status = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                tracing::warn!(pid = ?self.pid, grace = ?grace, "Guest process ignored SIGTERM, killing");
                self.child.start_kill()?;
                self.child.wait().await?
            }
        };

        self.alive.store(false, Ordering::SeqCst);
        tracing::info!(pid = ?self.pid, status = %status, "Guest process reaped");
        Ok(status)
    }
}
