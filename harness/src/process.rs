use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use std::time::Instant;

use tokio::process::Child;
use tokio::process::Command;
use tracing::debug;
use tracing::warn;

use crate::error::HarnessError;

/// How a supervised child is brought down at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationPolicy {
    /// SIGKILL the child. Used for processes with nothing to flush.
    HardKill,
    /// SIGTERM the child's process group, wait up to `timeout`, then SIGKILL
    /// the group.
    GracefulTerminate { timeout: Duration },
}

/// A child process owned by one validation run.
///
/// Dropping a `SupervisedProcess` that was never terminated kills it (and its
/// process group under [`TerminationPolicy::GracefulTerminate`]), so an
/// unwinding run cannot leave it behind.
#[derive(Debug)]
pub struct SupervisedProcess {
    name: &'static str,
    child: Child,
    pid: u32,
    started_at: Instant,
    policy: TerminationPolicy,
    terminated: bool,
}

impl SupervisedProcess {
    /// Spawns `command`. Graceful processes are placed in a new process group
    /// led by the child so that anything they fork can be signalled with them.
    pub fn spawn(
        name: &'static str,
        mut command: Command,
        policy: TerminationPolicy,
    ) -> Result<Self, HarnessError> {
        let program = command.as_std().get_program().to_string_lossy().into_owned();
        command.kill_on_drop(true);
        if matches!(policy, TerminationPolicy::GracefulTerminate { .. }) {
            command.process_group(0);
        }

        let child = command
            .spawn()
            .map_err(|err| HarnessError::launch(&program, err))?;
        let pid = child
            .id()
            .ok_or_else(|| HarnessError::launch(&program, io::Error::other("missing child pid")))?;
        debug!(name, pid, program = %program, "spawned child process");

        Ok(Self {
            name,
            child,
            pid,
            started_at: Instant::now(),
            policy,
            terminated: false,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Waits for the child to exit. Cancel safe: dropping the future leaves
    /// the child untouched.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Applies the termination policy and reaps the child.
    pub async fn terminate(mut self) {
        debug!(
            name = self.name,
            pid = self.pid,
            policy = ?self.policy,
            "terminating child process"
        );
        match self.policy {
            TerminationPolicy::HardKill => {
                if let Err(err) = self.child.start_kill() {
                    debug!(name = self.name, pid = self.pid, error = %err, "kill failed");
                }
                self.reap().await;
            }
            TerminationPolicy::GracefulTerminate { timeout } => {
                if let Err(err) = signal_group(self.pid, libc::SIGTERM) {
                    debug!(name = self.name, pid = self.pid, error = %err, "SIGTERM failed");
                }
                if tokio::time::timeout(timeout, self.reap()).await.is_err() {
                    warn!(
                        name = self.name,
                        pid = self.pid,
                        timeout_ms = timeout.as_millis() as u64,
                        "process group ignored SIGTERM; killing"
                    );
                    let _ = signal_group(self.pid, libc::SIGKILL);
                    self.reap().await;
                } else {
                    // Stragglers that outlived the group leader.
                    let _ = signal_group(self.pid, libc::SIGKILL);
                }
            }
        }
        self.terminated = true;
    }

    async fn reap(&mut self) {
        match self.child.wait().await {
            Ok(status) => debug!(
                name = self.name,
                pid = self.pid,
                %status,
                lifetime_ms = self.started_at.elapsed().as_millis() as u64,
                "child process reaped"
            ),
            Err(err) => warn!(
                name = self.name,
                pid = self.pid,
                error = %err,
                "failed to reap child process"
            ),
        }
    }
}

impl Drop for SupervisedProcess {
    fn drop(&mut self) {
        if self.terminated {
            return;
        }
        if matches!(self.policy, TerminationPolicy::GracefulTerminate { .. }) {
            let _ = signal_group(self.pid, libc::SIGKILL);
        }
        let _ = self.child.start_kill();
    }
}

/// Sends `signal` to every process in the group led by `pgid`.
pub(crate) fn signal_group(pgid: u32, signal: libc::c_int) -> io::Result<()> {
    let result = unsafe { libc::killpg(pgid as libc::pid_t, signal) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Zombies count as gone: they hold no resources and may never be reaped
/// when the test runs under a minimal init.
#[cfg(test)]
pub(crate) fn is_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next())
            .is_some_and(|state| state != 'Z'),
        Err(_) => false,
    }
}
