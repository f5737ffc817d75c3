//! Session state-change events broadcast to connected clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::SessionState;

/// Notification method name for lifecycle changes.
pub const STATE_CHANGED_METHOD: &str = "session.state_changed";

/// Payload of a `session.state_changed` notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateChanged {
    /// Session that moved.
    pub session_id: String,
    /// Owning task.
    pub task_id: String,
    /// State before the transition.
    pub previous: SessionState,
    /// State after the transition.
    pub state: SessionState,
    /// Failure text or other context, when present.
    pub reason: Option<String>,
    /// When the transition happened.
    pub at: DateTime<Utc>,
}

/// A state change plus the connection whose request caused it, if any.
///
/// The transport uses `origin` to skip echoing a change back to the client
/// that requested it.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    /// Connection id of the requesting client; `None` for background changes.
    pub origin: Option<u64>,
    /// Notification payload.
    pub change: StateChanged,
}
