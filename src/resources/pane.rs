//! tmux panes.
//!
//! A pane target has the form `<session>:<window>`; every agent session owns
//! a whole tmux session so that killing it cannot disturb other agents.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tracing::info;

use super::command::{run, run_checked};
use super::Removal;
use crate::{AppError, Result};

const TMUX: &str = "tmux";

/// tmux session name of a `<session>:<window>` target.
#[must_use]
pub fn session_name(target: &str) -> &str {
    target.split_once(':').map_or(target, |(name, _)| name)
}

fn window_name(target: &str) -> &str {
    target.split_once(':').map_or(target, |(_, window)| window)
}

/// Exact-match form of a session name, so `ab-1` never matches `ab-12`.
fn exact(name: &str) -> String {
    format!("={name}")
}

/// Open a detached tmux session for `target` rooted at `cwd`, with
/// `remain-on-exit` so a dead agent's last output stays visible.
///
/// # Errors
///
/// `AppError::Resource` if tmux fails; `AppError::Timeout` if it hangs.
pub async fn create(target: &str, cwd: &Path, limit: Duration) -> Result<()> {
    if exists(target, limit).await? {
        info!(target, "pane already present");
        return Ok(());
    }

    let cwd_arg = cwd.to_string_lossy();
    run_checked(
        TMUX,
        [
            "new-session",
            "-d",
            "-s",
            session_name(target),
            "-n",
            window_name(target),
            "-c",
            &*cwd_arg,
        ],
        None,
        limit,
    )
    .await?;

    run_checked(
        TMUX,
        ["set-option", "-w", "-t", target, "remain-on-exit", "on"],
        None,
        limit,
    )
    .await?;

    info!(target, cwd = %cwd.display(), "pane created");
    Ok(())
}

/// Kill the tmux session that owns `target`.
///
/// # Errors
///
/// `AppError::Resource` if tmux fails while the session still exists;
/// `AppError::Timeout` if it hangs.
pub async fn destroy(target: &str, limit: Duration) -> Result<Removal> {
    if !exists(target, limit).await? {
        return Ok(Removal::AlreadyAbsent);
    }
    let name = exact(session_name(target));
    let output = run(TMUX, ["kill-session", "-t", name.as_str()], None, limit).await?;
    if output.success {
        info!(target, "pane killed");
        return Ok(Removal::Removed);
    }
    if exists(target, limit).await? {
        return Err(AppError::Resource(format!(
            "tmux kill-session failed: {}",
            output.stderr
        )));
    }
    Ok(Removal::AlreadyAbsent)
}

/// Whether the tmux session for `target` exists.
///
/// A missing tmux binary or server both count as "absent".
///
/// # Errors
///
/// `AppError::Timeout` if tmux hangs.
pub async fn exists(target: &str, limit: Duration) -> Result<bool> {
    let name = exact(session_name(target));
    match run(TMUX, ["has-session", "-t", name.as_str()], None, limit).await {
        Ok(output) => Ok(output.success),
        Err(AppError::Resource(_)) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Replace whatever runs in the pane with `program args…` and return the
/// pid tmux reports for the new pane process.
///
/// # Errors
///
/// `AppError::Resource` if tmux fails or the pid cannot be parsed;
/// `AppError::Timeout` if tmux hangs.
pub async fn respawn(
    target: &str,
    cwd: &Path,
    program: &str,
    args: &[String],
    env: &HashMap<String, String>,
    limit: Duration,
) -> Result<u32> {
    let mut cmd_args: Vec<String> = vec![
        "respawn-pane".into(),
        "-k".into(),
        "-t".into(),
        target.into(),
        "-c".into(),
        cwd.to_string_lossy().into_owned(),
    ];
    let mut vars: Vec<_> = env.iter().collect();
    vars.sort();
    for (key, value) in vars {
        cmd_args.push("-e".into());
        cmd_args.push(format!("{key}={value}"));
    }
    cmd_args.push(shell_command(program, args));

    run_checked(TMUX, &cmd_args, None, limit).await?;

    let raw = run_checked(
        TMUX,
        ["display-message", "-p", "-t", target, "#{pane_pid}"],
        None,
        limit,
    )
    .await?;
    raw.trim()
        .parse::<u32>()
        .map_err(|err| AppError::Resource(format!("unexpected pane pid '{}': {err}", raw.trim())))
}

/// Last `lines` lines of the pane's scrollback.
///
/// # Errors
///
/// `AppError::Resource` if the pane is gone.
pub async fn capture(target: &str, lines: u32, limit: Duration) -> Result<String> {
    let start = format!("-{lines}");
    run_checked(
        TMUX,
        ["capture-pane", "-p", "-t", target, "-S", start.as_str()],
        None,
        limit,
    )
    .await
}

/// Type `text` into the pane and press Enter.
///
/// # Errors
///
/// `AppError::Resource` if the pane is gone.
pub async fn send_keys(target: &str, text: &str, limit: Duration) -> Result<()> {
    run_checked(TMUX, ["send-keys", "-t", target, "-l", text], None, limit).await?;
    run_checked(TMUX, ["send-keys", "-t", target, "Enter"], None, limit).await?;
    Ok(())
}

/// `exec program 'arg'…` with POSIX single-quote escaping; `exec` keeps the
/// pane pid equal to the agent pid.
#[must_use]
pub fn shell_command(program: &str, args: &[String]) -> String {
    let mut line = format!("exec {}", shell_quote(program));
    for arg in args {
        line.push(' ');
        line.push_str(&shell_quote(arg));
    }
    line
}

fn shell_quote(raw: &str) -> String {
    if !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        return raw.to_owned();
    }
    format!("'{}'", raw.replace('\'', r"'\''"))
}
