//! Resource Manager: workspaces, panes and processes.
//!
//! [`ResourceManager`] is the seam between the session controller and the
//! host. [`HostResources`] drives real `git`, `tmux` and signals; tests plug
//! in a recording fake.
//!
//! Every `destroy_*` tolerates an absent resource and reports it through
//! [`Removal::AlreadyAbsent`].

pub mod command;
pub mod pane;
pub mod process;
pub mod workspace;

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::session::ProcessHandle;
use crate::{GlobalConfig, Result};

pub use process::Termination;

/// Boxed future returned by [`ResourceManager`] operations.
pub type ResourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Outcome of an idempotent destroy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Removal {
    /// The resource existed and was removed.
    Removed,
    /// Nothing was there.
    AlreadyAbsent,
}

/// Everything needed to launch one agent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Session the process belongs to.
    pub session_id: String,
    /// Executable.
    pub program: String,
    /// Arguments after the program.
    pub args: Vec<String>,
    /// Working directory (the workspace).
    pub cwd: PathBuf,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Pane to run in; `None` spawns detached.
    pub pane_target: Option<String>,
}

/// Physical operations on the three per-session resources.
pub trait ResourceManager: Send + Sync {
    /// Create branch `branch` from `base_ref` and check it out at `path`.
    fn create_workspace<'a>(
        &'a self,
        repo: &'a Path,
        path: &'a Path,
        branch: &'a str,
        base_ref: &'a str,
    ) -> ResourceFuture<'a, ()>;

    /// Remove the checkout at `path`; the branch is kept.
    fn destroy_workspace<'a>(&'a self, repo: &'a Path, path: &'a Path)
        -> ResourceFuture<'a, Removal>;

    /// Whether `path` is a live checkout.
    fn workspace_exists<'a>(&'a self, path: &'a Path) -> ResourceFuture<'a, bool>;

    /// Open the pane `target` rooted at `cwd`.
    fn create_pane<'a>(&'a self, target: &'a str, cwd: &'a Path) -> ResourceFuture<'a, ()>;

    /// Kill the pane `target`.
    fn destroy_pane<'a>(&'a self, target: &'a str) -> ResourceFuture<'a, Removal>;

    /// Whether the pane `target` exists.
    fn pane_exists<'a>(&'a self, target: &'a str) -> ResourceFuture<'a, bool>;

    /// Launch the agent process and capture its pid.
    fn spawn_process(&self, launch: LaunchSpec) -> ResourceFuture<'_, ProcessHandle>;

    /// SIGTERM, wait up to `grace`, then SIGKILL.
    fn terminate_process(
        &self,
        handle: ProcessHandle,
        grace: Duration,
    ) -> ResourceFuture<'_, Termination>;

    /// Suspend the process.
    fn suspend_process(&self, handle: ProcessHandle) -> ResourceFuture<'_, ()>;

    /// Continue a suspended process.
    fn resume_process(&self, handle: ProcessHandle) -> ResourceFuture<'_, ()>;

    /// Whether the process is alive.
    fn process_alive(&self, handle: ProcessHandle) -> ResourceFuture<'_, bool>;

    /// Pane scrollback.
    fn capture_pane<'a>(&'a self, target: &'a str, lines: u32) -> ResourceFuture<'a, String>;

    /// Type into the pane.
    fn send_keys<'a>(&'a self, target: &'a str, text: &'a str) -> ResourceFuture<'a, ()>;

    /// Uncommitted changes in the checkout.
    fn workspace_diff<'a>(&'a self, path: &'a Path) -> ResourceFuture<'a, String>;

    /// Run `argv` in the checkout, bounded by `limit`.
    fn run_in_workspace<'a>(
        &'a self,
        path: &'a Path,
        argv: &'a [String],
        limit: Duration,
    ) -> ResourceFuture<'a, String>;
}

/// [`ResourceManager`] backed by the real host.
#[derive(Debug, Clone)]
pub struct HostResources {
    command_timeout: Duration,
    children: process::ChildRegistry,
}

impl HostResources {
    /// Build from the daemon configuration.
    #[must_use]
    pub fn new(config: &GlobalConfig) -> Self {
        Self {
            command_timeout: config.command_timeout(),
            children: process::ChildRegistry::default(),
        }
    }
}

impl ResourceManager for HostResources {
    fn create_workspace<'a>(
        &'a self,
        repo: &'a Path,
        path: &'a Path,
        branch: &'a str,
        base_ref: &'a str,
    ) -> ResourceFuture<'a, ()> {
        Box::pin(workspace::create(
            repo,
            path,
            branch,
            base_ref,
            self.command_timeout,
        ))
    }

    fn destroy_workspace<'a>(
        &'a self,
        repo: &'a Path,
        path: &'a Path,
    ) -> ResourceFuture<'a, Removal> {
        Box::pin(workspace::destroy(repo, path, self.command_timeout))
    }

    fn workspace_exists<'a>(&'a self, path: &'a Path) -> ResourceFuture<'a, bool> {
        Box::pin(workspace::exists(path, self.command_timeout))
    }

    fn create_pane<'a>(&'a self, target: &'a str, cwd: &'a Path) -> ResourceFuture<'a, ()> {
        Box::pin(pane::create(target, cwd, self.command_timeout))
    }

    fn destroy_pane<'a>(&'a self, target: &'a str) -> ResourceFuture<'a, Removal> {
        Box::pin(pane::destroy(target, self.command_timeout))
    }

    fn pane_exists<'a>(&'a self, target: &'a str) -> ResourceFuture<'a, bool> {
        Box::pin(pane::exists(target, self.command_timeout))
    }

    fn spawn_process(&self, launch: LaunchSpec) -> ResourceFuture<'_, ProcessHandle> {
        Box::pin(async move {
            let pid = match &launch.pane_target {
                Some(target) => {
                    pane::respawn(
                        target,
                        &launch.cwd,
                        &launch.program,
                        &launch.args,
                        &launch.env,
                        self.command_timeout,
                    )
                    .await?
                }
                None => {
                    self.children
                        .spawn(&launch.program, &launch.args, &launch.cwd, &launch.env)
                        .await?
                }
            };
            Ok(ProcessHandle { pid })
        })
    }

    fn terminate_process(
        &self,
        handle: ProcessHandle,
        grace: Duration,
    ) -> ResourceFuture<'_, Termination> {
        Box::pin(self.children.terminate(handle.pid, grace))
    }

    fn suspend_process(&self, handle: ProcessHandle) -> ResourceFuture<'_, ()> {
        Box::pin(async move { process::suspend(handle.pid) })
    }

    fn resume_process(&self, handle: ProcessHandle) -> ResourceFuture<'_, ()> {
        Box::pin(async move { process::resume(handle.pid) })
    }

    fn process_alive(&self, handle: ProcessHandle) -> ResourceFuture<'_, bool> {
        Box::pin(async move { Ok(self.children.is_alive(handle.pid).await) })
    }

    fn capture_pane<'a>(&'a self, target: &'a str, lines: u32) -> ResourceFuture<'a, String> {
        Box::pin(pane::capture(target, lines, self.command_timeout))
    }

    fn send_keys<'a>(&'a self, target: &'a str, text: &'a str) -> ResourceFuture<'a, ()> {
        Box::pin(pane::send_keys(target, text, self.command_timeout))
    }

    fn workspace_diff<'a>(&'a self, path: &'a Path) -> ResourceFuture<'a, String> {
        Box::pin(workspace::diff(path, self.command_timeout))
    }

    fn run_in_workspace<'a>(
        &'a self,
        path: &'a Path,
        argv: &'a [String],
        limit: Duration,
    ) -> ResourceFuture<'a, String> {
        Box::pin(workspace::run_command(path, argv, limit))
    }
}
