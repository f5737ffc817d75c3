//! Startup reconciliation of persisted sessions against the host.
//!
//! The daemon may have exited while agents kept running in tmux, or while a
//! transition was half done. [`assess`] decides what each persisted session
//! needs; the controller applies the plan before any client connects.

use tracing::{info, warn};

use crate::models::session::{Session, SessionState};
use crate::resources::ResourceManager;

/// Corrective action for one persisted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Persisted state matches the host.
    Keep,
    /// A start was interrupted: release whatever exists, then `failed`.
    AbortStart(String),
    /// The agent process, its pane or its workspace is gone: `failed`.
    Fail(String),
    /// A stop was interrupted: finish terminating, then `stopped`.
    FinishStop,
}

/// Compare `session` with the host and choose a [`Plan`].
pub async fn assess(resources: &dyn ResourceManager, session: &Session) -> Plan {
    match session.state {
        SessionState::Created => {
            Plan::AbortStart("daemon restarted before the session started".into())
        }
        SessionState::Starting => {
            Plan::AbortStart("daemon restarted while the session was starting".into())
        }
        SessionState::Stopping => Plan::FinishStop,
        SessionState::Running | SessionState::Paused => {
            let Some(handle) = session.process else {
                return Plan::Fail("no agent process recorded".into());
            };
            let alive = match resources.process_alive(handle).await {
                Ok(alive) => alive,
                Err(err) => {
                    warn!(session_id = %session.id, %err, "liveness probe failed during restore");
                    false
                }
            };
            if !alive {
                return Plan::Fail("agent process exited while the daemon was down".into());
            }
            // In a pane the agent is the pane process; without the pane the
            // recorded pid belongs to someone else.
            if let Some(target) = session.pane_target.as_deref() {
                if !resources.pane_exists(target).await.unwrap_or(false) {
                    warn!(session_id = %session.id, target, "pane missing for live session");
                    return Plan::Fail(format!("pane {target} vanished while the daemon was down"));
                }
            }
            if !resources
                .workspace_exists(&session.workspace_path)
                .await
                .unwrap_or(false)
            {
                warn!(session_id = %session.id, path = %session.workspace_path.display(), "workspace missing for live session");
                return Plan::Fail("workspace vanished while the daemon was down".into());
            }
            info!(session_id = %session.id, pid = handle.pid, state = %session.state, "live session re-adopted");
            Plan::Keep
        }
        SessionState::Stopped | SessionState::Failed | SessionState::Archived => Plan::Keep,
    }
}
