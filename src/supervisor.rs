//! Worker process lifecycle
//!
//! The supervisor owns at most one current worker. A restart signals the
//! current worker with SIGTERM, waits the grace delay and spawns a fresh one.
//! By default it does not wait for the old process to actually exit, so a
//! replacement that binds the same port can briefly hit "address in use";
//! set `wait_for_exit` to wait (up to the grace delay) for the exit first.

use crate::config::Config;
use anyhow::{bail, Context, Result};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Starting => "starting",
            Lifecycle::Running => "running",
            Lifecycle::Stopping => "stopping",
            Lifecycle::Stopped => "stopped",
        }
    }
}

/// A spawned worker. Replaced on restart, never reused.
#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
    pid: Option<u32>,
    state: Lifecycle,
    /// Exit seen while confirming the start, not yet reported by `poll_exit`
    unreported_exit: Option<ExitStatus>,
}

impl WorkerProcess {
    /// Spawn `command` with inherited stdio and environment. The new worker
    /// is `Starting` until [`WorkerProcess::confirm_started`] sees it alive.
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command.split_first().context("Worker command is empty")?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to start worker `{}`", command.join(" ")))?;
        Ok(Self {
            pid: child.id(),
            child,
            state: Lifecycle::Starting,
            unreported_exit: None,
        })
    }

    /// Starting → Running if the process is still alive, otherwise Stopped.
    pub fn confirm_started(&mut self) -> Lifecycle {
        if self.state != Lifecycle::Starting {
            return self.state;
        }
        match self.child.try_wait() {
            Ok(None) => self.state = Lifecycle::Running,
            Ok(Some(status)) => {
                tracing::warn!(pid = ?self.pid, %status, "worker exited right after starting");
                self.unreported_exit = Some(status);
                self.state = Lifecycle::Stopped;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to check worker status; assuming it runs");
                self.state = Lifecycle::Running;
            }
        }
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    /// Ask the worker to shut down. Never a hard kill on unix.
    fn terminate(&mut self) -> Result<()> {
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let Some(pid) = self.pid else {
                return Ok(());
            };
            match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(e) => Err(anyhow::anyhow!("kill SIGTERM {}: {}", pid, e)),
            }
        }

        #[cfg(not(unix))]
        {
            self.child
                .start_kill()
                .context("Failed to stop worker process")
        }
    }
}

pub struct Supervisor {
    command: Vec<String>,
    grace: Duration,
    wait_for_exit: bool,
    current: Option<WorkerProcess>,
    restarts: u32,
}

impl Supervisor {
    pub fn new(command: Vec<String>, grace: Duration, wait_for_exit: bool) -> Result<Self> {
        if command.first().map_or(true, |p| p.trim().is_empty()) {
            bail!("Worker command is empty");
        }
        Ok(Self {
            command,
            grace,
            wait_for_exit,
            current: None,
            restarts: 0,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.worker.clone(),
            config.restart_grace(),
            config.wait_for_exit,
        )
    }

    /// State of the current worker; `Stopped` when there is none.
    pub fn state(&self) -> Lifecycle {
        self.current
            .as_ref()
            .map_or(Lifecycle::Stopped, |w| w.state)
    }

    pub fn pid(&self) -> Option<u32> {
        self.current.as_ref().and_then(|w| w.pid)
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Spawn a worker and make it current, replacing any previous handle.
    pub fn start_child(&mut self) -> Result<()> {
        let mut worker = WorkerProcess::spawn(&self.command)?;
        tracing::debug!(pid = ?worker.pid, state = worker.state.as_str(), "worker spawned");
        let state = worker.confirm_started();
        tracing::info!(pid = ?worker.pid, state = state.as_str(), "worker started");

        if let Some(previous) = self.current.replace(worker) {
            tracing::debug!(pid = ?previous.pid, state = previous.state.as_str(), "released previous worker handle");
        }
        Ok(())
    }

    /// SIGTERM the current worker, wait the grace delay, start a new one.
    pub async fn restart_child(&mut self, reason: &str) -> Result<()> {
        let grace = self.grace;
        let wait_for_exit = self.wait_for_exit;
        let Some(worker) = self.current.as_mut() else {
            return self.start_child();
        };

        tracing::info!(pid = ?worker.pid, reason, "restarting worker");
        if worker.state == Lifecycle::Stopped {
            // already exited and reaped; its pid may belong to someone else now
            self.restarts += 1;
            return self.start_child();
        }
        worker.state = Lifecycle::Stopping;
        if let Err(e) = worker.terminate() {
            tracing::warn!(error = %e, "failed to signal worker");
        }

        if wait_for_exit {
            match tokio::time::timeout(grace, worker.child.wait()).await {
                Ok(Ok(status)) => tracing::info!(pid = ?worker.pid, %status, "worker exited"),
                Ok(Err(e)) => tracing::warn!(error = %e, "failed to wait for worker"),
                Err(_) => tracing::warn!(
                    pid = ?worker.pid,
                    grace_ms = grace.as_millis() as u64,
                    "worker did not exit within the grace delay; starting replacement anyway"
                ),
            }
        } else {
            tokio::time::sleep(grace).await;
        }
        worker.state = Lifecycle::Stopped;

        self.restarts += 1;
        self.start_child()
    }

    /// Notice a worker that exited on its own. Does not restart it.
    pub fn poll_exit(&mut self) -> Option<ExitStatus> {
        let worker = self.current.as_mut()?;
        if let Some(status) = worker.unreported_exit.take() {
            return Some(status);
        }
        if !matches!(worker.state, Lifecycle::Starting | Lifecycle::Running) {
            return None;
        }
        match worker.child.try_wait() {
            Ok(Some(status)) => {
                worker.state = Lifecycle::Stopped;
                tracing::warn!(pid = ?worker.pid, %status, "worker exited");
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to poll worker status");
                None
            }
        }
    }

    /// Gracefully stop the current worker, waiting up to the grace delay.
    pub async fn shutdown(&mut self) {
        let grace = self.grace;
        let Some(worker) = self.current.as_mut() else {
            return;
        };
        if worker.state == Lifecycle::Stopped {
            return;
        }

        worker.state = Lifecycle::Stopping;
        if let Err(e) = worker.terminate() {
            tracing::warn!(error = %e, "failed to signal worker");
        }
        match tokio::time::timeout(grace, worker.child.wait()).await {
            Ok(Ok(status)) => tracing::info!(pid = ?worker.pid, %status, "worker stopped"),
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to wait for worker"),
            Err(_) => tracing::warn!(pid = ?worker.pid, "worker still running after shutdown grace"),
        }
        worker.state = Lifecycle::Stopped;
    }
}
