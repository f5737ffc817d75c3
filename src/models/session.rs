//! Session model and lifecycle helpers.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state for an agent session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Record exists; no resources yet.
    Created,
    /// Workspace, pane and process are being created.
    Starting,
    /// Agent process is alive.
    Running,
    /// Agent process is suspended with SIGSTOP.
    Paused,
    /// Termination in progress.
    Stopping,
    /// Process gone; workspace and pane kept for inspection.
    Stopped,
    /// Workspace and pane removed; branch and record kept.
    Archived,
    /// A resource operation failed or the process died unexpectedly.
    Failed,
}

impl SessionState {
    /// All states, in lifecycle order.
    pub const ALL: [Self; 8] = [
        Self::Created,
        Self::Starting,
        Self::Running,
        Self::Paused,
        Self::Stopping,
        Self::Stopped,
        Self::Archived,
        Self::Failed,
    ];

    /// Stable lowercase name used on the wire and in the store.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Archived => "archived",
            Self::Failed => "failed",
        }
    }

    /// Parse a stored state name.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == raw)
    }

    /// Whether a live agent process must exist in this state.
    #[must_use]
    pub fn requires_process(self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Stopping)
    }

    /// Whether the session counts against the concurrency limit.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Running | Self::Paused | Self::Stopping
        )
    }

    /// Whether the lifecycle edge `self -> next` exists.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Starting)
                | (Self::Starting, Self::Running | Self::Stopping | Self::Failed)
                | (Self::Running, Self::Paused | Self::Stopping | Self::Failed)
                | (Self::Paused, Self::Running | Self::Stopping | Self::Failed)
                | (Self::Stopping, Self::Stopped | Self::Failed)
                | (Self::Stopped | Self::Failed, Self::Archived)
        )
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of the live agent process bound to a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessHandle {
    /// OS process id.
    pub pid: u32,
}

/// Session domain entity persisted in `SQLite`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Unique record identifier (UUID v4).
    pub id: String,
    /// Owning task identifier.
    pub task_id: String,
    /// Agent backend tag.
    pub agent: String,
    /// Human-readable name, `<agent>-<short id>`.
    pub display_name: String,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Repository the worktree is cut from.
    pub repo_path: PathBuf,
    /// Reference the branch starts at.
    pub base_ref: String,
    /// Worktree checkout path.
    pub workspace_path: PathBuf,
    /// Branch created for this session.
    pub branch: String,
    /// tmux target (`session:window`), absent when running detached.
    pub pane_target: Option<String>,
    /// Live process, present only in `running`, `paused` and `stopping`.
    pub process: Option<ProcessHandle>,
    /// Initial instruction for the agent.
    pub prompt: Option<String>,
    /// Model override passed to the backend.
    pub model: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent transition.
    pub updated_at: DateTime<Utc>,
    /// Most recent failure text.
    pub last_error: Option<String>,
}

/// Inputs for a new session record; resource names are derived from these.
#[derive(Debug, Clone)]
pub struct NewSession {
    /// Owning task.
    pub task_id: String,
    /// Agent backend tag.
    pub agent: String,
    /// Source repository.
    pub repo_path: PathBuf,
    /// Base reference.
    pub base_ref: String,
    /// Directory that holds the worktree checkouts.
    pub worktree_parent: PathBuf,
    /// tmux session-name prefix, or `None` when tmux is disabled.
    pub pane_prefix: Option<String>,
    /// Initial instruction.
    pub prompt: Option<String>,
    /// Model override.
    pub model: Option<String>,
}

impl Session {
    /// Construct a `created` session with a generated identifier and the
    /// workspace, branch and pane names derived from it.
    ///
    /// `long_names` switches the suffix from the 8-character short id to the
    /// full id, used when the short form collides with a live session.
    #[must_use]
    pub fn new(spec: NewSession, long_names: bool) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let suffix = if long_names {
            id.clone()
        } else {
            id[..8].to_owned()
        };
        let display_name = format!("{}-{suffix}", spec.agent);
        Self {
            workspace_path: spec.worktree_parent.join(&suffix),
            branch: format!("session/{display_name}"),
            pane_target: spec
                .pane_prefix
                .map(|prefix| format!("{prefix}-{suffix}:{}", spec.agent)),
            id,
            task_id: spec.task_id,
            agent: spec.agent,
            display_name,
            state: SessionState::Created,
            repo_path: spec.repo_path,
            base_ref: spec.base_ref,
            process: None,
            prompt: spec.prompt,
            model: spec.model,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    /// Short id used in log lines and generated names.
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }

    /// tmux session name (the part of `pane_target` before `:`).
    #[must_use]
    pub fn pane_session(&self) -> Option<&str> {
        self.pane_target
            .as_deref()
            .map(|target| target.split_once(':').map_or(target, |(name, _)| name))
    }

    /// Whether a lifecycle transition is permitted from the current state.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        self.state.can_transition_to(next)
    }

    /// State and process handle agree.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.state.requires_process() == self.process.is_some()
            || (self.state == SessionState::Starting)
    }
}
