//! Agent process control through POSIX signals.
//!
//! Processes launched directly by the daemon are kept in a
//! [`ChildRegistry`] so their exit status can be reaped; processes launched
//! inside tmux (or inherited from a previous daemon run) are probed by pid.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{AppError, Result};

/// Environment variables inherited by directly spawned agents. Everything
/// else in the daemon's environment is stripped.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "LC_ALL",
    "TERM",
    "SHELL",
    "TMPDIR",
    "RUST_LOG",
];

/// Poll step while waiting for a signalled process to exit.
const EXIT_POLL: Duration = Duration::from_millis(100);

/// How long to wait for the kernel to reap a process after SIGKILL.
const KILL_WAIT: Duration = Duration::from_secs(2);

/// How a termination request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited after SIGTERM within the grace period.
    Graceful,
    /// Needed SIGKILL.
    Forced,
    /// Was not running when termination started.
    AlreadyExited,
}

/// Children spawned directly by this daemon, keyed by pid.
#[derive(Debug, Clone, Default)]
pub struct ChildRegistry {
    children: Arc<Mutex<HashMap<u32, Child>>>,
}

impl ChildRegistry {
    /// Launch `program args…` in `cwd` with a cleared environment plus the
    /// allowlist and `env`.
    ///
    /// # Errors
    ///
    /// `AppError::Resource` if the OS refuses to spawn the program.
    pub async fn spawn(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        env: &HashMap<String, String>,
    ) -> Result<u32> {
        let mut cmd = Command::new(program);
        cmd.args(args);

        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        cmd.envs(env);

        cmd.current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        let child = cmd
            .spawn()
            .map_err(|err| AppError::Resource(format!("failed to spawn {program}: {err}")))?;
        let pid = child
            .id()
            .ok_or_else(|| AppError::Resource(format!("{program} exited during spawn")))?;

        self.children.lock().await.insert(pid, child);
        info!(pid, program, "agent process spawned");
        Ok(pid)
    }

    /// Whether `pid` refers to a live process. Reaps tracked children that
    /// have exited.
    pub async fn is_alive(&self, pid: u32) -> bool {
        let mut guard = self.children.lock().await;
        if let Some(child) = guard.get_mut(&pid) {
            return match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    info!(pid, %status, "agent process exited");
                    guard.remove(&pid);
                    false
                }
                Err(err) => {
                    warn!(pid, %err, "failed to poll agent process");
                    guard.remove(&pid);
                    false
                }
            };
        }
        drop(guard);
        pid_alive(pid)
    }

    /// Send SIGCONT + SIGTERM, wait up to `grace`, then SIGKILL.
    ///
    /// # Errors
    ///
    /// `AppError::Resource` if a signal cannot be delivered for a reason
    /// other than the process being gone, or the process survives SIGKILL.
    pub async fn terminate(&self, pid: u32, grace: Duration) -> Result<Termination> {
        if !self.is_alive(pid).await {
            return Ok(Termination::AlreadyExited);
        }

        // A stopped process never handles SIGTERM.
        deliver(pid, Signal::SIGCONT)?;
        deliver(pid, Signal::SIGTERM)?;
        if self.wait_exit(pid, grace).await {
            info!(pid, "agent process exited after SIGTERM");
            return Ok(Termination::Graceful);
        }

        warn!(pid, grace_secs = grace.as_secs(), "grace period elapsed, sending SIGKILL");
        deliver(pid, Signal::SIGKILL)?;
        if self.wait_exit(pid, KILL_WAIT).await {
            return Ok(Termination::Forced);
        }
        Err(AppError::Resource(format!("process {pid} survived SIGKILL")))
    }

    async fn wait_exit(&self, pid: u32, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if !self.is_alive(pid).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL).await;
        }
    }
}

/// Suspend `pid` with SIGSTOP.
///
/// # Errors
///
/// `AppError::Resource` if the process is gone or cannot be signalled.
pub fn suspend(pid: u32) -> Result<()> {
    signal_live(pid, Signal::SIGSTOP)
}

/// Continue `pid` with SIGCONT.
///
/// # Errors
///
/// `AppError::Resource` if the process is gone or cannot be signalled.
pub fn resume(pid: u32) -> Result<()> {
    signal_live(pid, Signal::SIGCONT)
}

/// `kill(pid, 0)`: the process exists (EPERM still means it exists).
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

fn to_pid(pid: u32) -> Result<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(Pid::from_raw(raw)),
        _ => Err(AppError::Resource(format!("invalid pid {pid}"))),
    }
}

/// Signal a process that must exist.
fn signal_live(pid: u32, signal: Signal) -> Result<()> {
    kill(to_pid(pid)?, signal).map_err(|errno| match errno {
        Errno::ESRCH => AppError::Resource(format!("process {pid} is not running")),
        other => AppError::Resource(format!("cannot send {signal} to {pid}: {other}")),
    })
}

/// Signal a process that may already be gone; ESRCH is not an error.
fn deliver(pid: u32, signal: Signal) -> Result<()> {
    match kill(to_pid(pid)?, signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(other) => Err(AppError::Resource(format!(
            "cannot send {signal} to {pid}: {other}"
        ))),
    }
}
