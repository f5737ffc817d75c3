//! Git worktree workspaces.
//!
//! Each session gets its own branch and checkout cut from the task
//! repository. Removing a workspace deletes the checkout only; the branch
//! stays resolvable in the source repository.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use super::command::{run, run_checked};
use super::Removal;
use crate::{AppError, Result};

/// Diffs larger than this are cut and marked as truncated.
pub const MAX_DIFF_BYTES: usize = 10_000;

/// Create branch `branch` at `base_ref` and check it out at `path`.
///
/// Re-running for a checkout that already exists on `branch` succeeds
/// without touching it.
///
/// # Errors
///
/// `AppError::Resource` if `repo` is not a git repository, `path` is
/// occupied by something else, or `git worktree add` fails;
/// `AppError::Timeout` if git hangs.
pub async fn create(
    repo: &Path,
    path: &Path,
    branch: &str,
    base_ref: &str,
    limit: Duration,
) -> Result<()> {
    if path.exists() {
        if current_branch(path, limit).await?.as_deref() == Some(branch) {
            info!(path = %path.display(), branch, "workspace already present");
            return Ok(());
        }
        return Err(AppError::Resource(format!(
            "workspace path {} is already in use",
            path.display()
        )));
    }

    run_checked("git", ["rev-parse", "--git-dir"], Some(repo), limit)
        .await
        .map_err(|err| {
            AppError::Resource(format!("{} is not a git repository: {err}", repo.display()))
        })?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|err| {
            AppError::Resource(format!("cannot create {}: {err}", parent.display()))
        })?;
    }

    let path_arg = path.to_string_lossy();
    run_checked(
        "git",
        ["worktree", "add", "-b", branch, &*path_arg, base_ref],
        Some(repo),
        limit,
    )
    .await?;

    info!(path = %path.display(), branch, base_ref, "workspace created");
    Ok(())
}

/// Remove the checkout at `path`, leaving its branch in place.
///
/// # Errors
///
/// `AppError::Resource` if git refuses and the checkout is still on disk;
/// `AppError::Timeout` if git hangs.
pub async fn destroy(repo: &Path, path: &Path, limit: Duration) -> Result<Removal> {
    if !path.exists() {
        prune(repo, limit).await;
        return Ok(Removal::AlreadyAbsent);
    }

    let path_arg = path.to_string_lossy();
    let output = run(
        "git",
        ["worktree", "remove", "--force", &*path_arg],
        Some(repo),
        limit,
    )
    .await?;

    if !output.success {
        if path.exists() {
            return Err(AppError::Resource(format!(
                "git worktree remove failed: {}",
                output.stderr
            )));
        }
        warn!(path = %path.display(), stderr = %output.stderr, "worktree vanished during removal");
    }

    prune(repo, limit).await;
    info!(path = %path.display(), "workspace removed");
    Ok(Removal::Removed)
}

/// Whether `path` exists and is a git checkout.
///
/// # Errors
///
/// `AppError::Timeout` if git hangs.
pub async fn exists(path: &Path, limit: Duration) -> Result<bool> {
    if !path.is_dir() {
        return Ok(false);
    }
    let output = run(
        "git",
        ["rev-parse", "--is-inside-work-tree"],
        Some(path),
        limit,
    )
    .await?;
    Ok(output.success && output.stdout.trim() == "true")
}

/// Run `argv` inside the checkout and return stdout followed by stderr.
///
/// The exit status is not an error; the output is what the caller wants.
///
/// # Errors
///
/// `AppError::InvalidParams` for an empty `argv`; `AppError::Resource` if
/// the checkout is missing or the program cannot start; `AppError::Timeout`
/// if it outlives `limit`.
pub async fn run_command(path: &Path, argv: &[String], limit: Duration) -> Result<String> {
    let Some((program, args)) = argv.split_first() else {
        return Err(AppError::InvalidParams("command must not be empty".into()));
    };
    if !path.is_dir() {
        return Err(AppError::Resource(format!(
            "workspace {} does not exist",
            path.display()
        )));
    }
    let output = run(program, args, Some(path), limit).await?;
    info!(path = %path.display(), program, success = output.success, "worktree command finished");

    let mut text = output.stdout;
    if !output.stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&output.stderr);
    }
    Ok(text)
}

/// `git diff HEAD` inside the checkout, capped at [`MAX_DIFF_BYTES`].
///
/// # Errors
///
/// `AppError::Resource` if the checkout is missing or git fails.
pub async fn diff(path: &Path, limit: Duration) -> Result<String> {
    if !path.is_dir() {
        return Err(AppError::Resource(format!(
            "workspace {} does not exist",
            path.display()
        )));
    }
    let mut text = run_checked("git", ["diff", "HEAD"], Some(path), limit).await?;
    if text.len() > MAX_DIFF_BYTES {
        let mut cut = MAX_DIFF_BYTES;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("\n... (truncated)\n");
    }
    Ok(text)
}

async fn current_branch(path: &Path, limit: Duration) -> Result<Option<String>> {
    let output = run(
        "git",
        ["rev-parse", "--abbrev-ref", "HEAD"],
        Some(path),
        limit,
    )
    .await?;
    Ok(output.success.then(|| output.stdout.trim().to_owned()))
}

async fn prune(repo: &Path, limit: Duration) {
    if !repo.is_dir() {
        return;
    }
    if let Err(err) = run("git", ["worktree", "prune"], Some(repo), limit).await {
        warn!(%err, repo = %repo.display(), "git worktree prune failed");
    }
}
