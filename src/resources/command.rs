//! Bounded execution of external `git` and `tmux` commands.

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::{AppError, Result};

/// Captured result of a finished external command.
#[derive(Debug)]
pub struct CommandOutput {
    /// Whether the process exited with status zero.
    pub success: bool,
    /// Decoded stdout.
    pub stdout: String,
    /// Decoded stderr, trimmed.
    pub stderr: String,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        }
    }
}

/// Run `program args…` in `cwd`, waiting at most `limit`.
///
/// A non-zero exit is *not* an error here; callers inspect
/// [`CommandOutput::success`] because "already absent" answers from `git`
/// and `tmux` arrive as failures.
///
/// # Errors
///
/// - `AppError::Timeout` if the command does not finish within `limit`
///   (the child is killed).
/// - `AppError::Resource` if the program cannot be launched.
pub async fn run<I, S>(
    program: &str,
    args: I,
    cwd: Option<&Path>,
    limit: Duration,
) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    debug!(program, ?cwd, "running external command");
    match tokio::time::timeout(limit, cmd.output()).await {
        Ok(Ok(output)) => Ok(output.into()),
        Ok(Err(err)) => Err(AppError::Resource(format!("failed to run {program}: {err}"))),
        Err(_elapsed) => Err(AppError::Timeout(format!(
            "{program} did not finish within {}s",
            limit.as_secs()
        ))),
    }
}

/// Like [`run`] but treats a non-zero exit as `AppError::Resource` carrying
/// stderr, and returns stdout on success.
///
/// # Errors
///
/// Everything [`run`] returns, plus `AppError::Resource` on non-zero exit.
pub async fn run_checked<I, S>(
    program: &str,
    args: I,
    cwd: Option<&Path>,
    limit: Duration,
) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run(program, args, cwd, limit).await?;
    if output.success {
        Ok(output.stdout)
    } else {
        Err(AppError::Resource(format!("{program} failed: {}", output.stderr)))
    }
}
