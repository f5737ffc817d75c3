//! Capability interface shared by the in-process controller and the
//! remote proxy.
//!
//! Client programs are written once against [`SessionApi`]; the daemon wires
//! [`crate::orchestrator::controller::SessionController`] and clients wire
//! [`crate::rpc::client::RemoteSessionApi`].

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::session::{Session, SessionState};
use crate::Result;

/// Boxed future returned by every [`SessionApi`] operation.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Parameters for `session.start_coding`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StartCodingRequest {
    /// Owning task.
    pub task_id: String,
    /// Agent backend tag; the configured default when absent.
    #[serde(default)]
    pub agent: Option<String>,
    /// Source repository; the configured default when absent.
    #[serde(default)]
    pub repo_path: Option<PathBuf>,
    /// Base reference; the configured default when absent.
    #[serde(default)]
    pub base_ref: Option<String>,
    /// Initial instruction for the agent.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Model override.
    #[serde(default)]
    pub model: Option<String>,
}

/// Filter for `session.list`. Empty matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SessionFilter {
    /// Only sessions of this task.
    #[serde(default)]
    pub task_id: Option<String>,
    /// Only sessions in one of these states.
    #[serde(default)]
    pub states: Option<Vec<SessionState>>,
}

impl SessionFilter {
    /// Whether `session` passes the filter.
    #[must_use]
    pub fn matches(&self, session: &Session) -> bool {
        self.task_id
            .as_deref()
            .map_or(true, |task| task == session.task_id)
            && self
                .states
                .as_deref()
                .map_or(true, |states| states.contains(&session.state))
    }
}

/// Result of `session.check_liveness`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LivenessReport {
    /// Probed session.
    pub session_id: String,
    /// State after the probe (may have moved to `failed`).
    pub state: SessionState,
    /// Whether the agent process is alive.
    pub process_alive: bool,
    /// Whether the tmux pane exists (`false` when running detached).
    pub pane_present: bool,
    /// Whether the worktree checkout exists.
    pub workspace_present: bool,
}

/// Result of `server.status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerStatus {
    /// Always `"running"` for a responsive daemon.
    pub status: String,
    /// Crate version of the daemon.
    pub version: String,
    /// Daemon process id.
    pub pid: u32,
    /// When the daemon started.
    pub started_at: DateTime<Utc>,
    /// Listening socket path.
    pub socket_path: PathBuf,
    /// Open client connections.
    pub connections: usize,
    /// Session counts keyed by state name.
    pub sessions: std::collections::BTreeMap<String, usize>,
}

/// The session operation set.
///
/// Every method takes owned arguments so implementations can move them into
/// the returned future.
pub trait SessionApi: Send + Sync {
    /// Create a session and bring it to `running`.
    fn start_coding(&self, request: StartCodingRequest) -> ApiFuture<'_, Session>;

    /// Terminate the agent process, keeping workspace and pane.
    fn stop(&self, session_id: String) -> ApiFuture<'_, Session>;

    /// Suspend the agent process.
    fn pause(&self, session_id: String) -> ApiFuture<'_, Session>;

    /// Continue a suspended agent process.
    fn resume(&self, session_id: String) -> ApiFuture<'_, Session>;

    /// Remove workspace and pane of a stopped or failed session.
    fn archive(&self, session_id: String) -> ApiFuture<'_, Session>;

    /// Fetch one session.
    fn get(&self, session_id: String) -> ApiFuture<'_, Session>;

    /// List sessions matching `filter`, oldest first.
    fn list(&self, filter: SessionFilter) -> ApiFuture<'_, Vec<Session>>;

    /// Probe resources now, failing the session if its process is gone.
    fn check_liveness(&self, session_id: String) -> ApiFuture<'_, LivenessReport>;

    /// Last `lines` lines of pane scrollback.
    fn get_output(&self, session_id: String, lines: u32) -> ApiFuture<'_, String>;

    /// Type `text` into the pane followed by Enter.
    fn send_to(&self, session_id: String, text: String) -> ApiFuture<'_, ()>;

    /// Uncommitted changes in the session worktree.
    fn get_diff(&self, session_id: String) -> ApiFuture<'_, String>;

    /// Run a shell-quoted `command` in the session worktree and return its
    /// combined output.
    fn run_in_worktree(&self, session_id: String, command: String) -> ApiFuture<'_, String>;

    /// Liveness check for the daemon itself; returns `"pong"`.
    fn ping(&self) -> ApiFuture<'_, String>;

    /// Daemon status summary.
    fn status(&self) -> ApiFuture<'_, ServerStatus>;
}
