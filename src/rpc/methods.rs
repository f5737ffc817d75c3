//! The daemon's method table.
//!
//! Param structs here are shared with [`super::client::RemoteSessionApi`]
//! so both ends agree on field names.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::dispatcher::{DispatchContext, MethodRegistry};
use crate::api::{SessionFilter, StartCodingRequest};
use crate::orchestrator::controller::DEFAULT_OUTPUT_LINES;
use crate::Result;

/// `session.start_coding`
pub const START_CODING: &str = "session.start_coding";
/// `session.stop`
pub const STOP: &str = "session.stop";
/// `session.pause`
pub const PAUSE: &str = "session.pause";
/// `session.resume`
pub const RESUME: &str = "session.resume";
/// `session.archive`
pub const ARCHIVE: &str = "session.archive";
/// `session.get`
pub const GET: &str = "session.get";
/// `session.list`
pub const LIST: &str = "session.list";
/// `session.check_liveness`
pub const CHECK_LIVENESS: &str = "session.check_liveness";
/// `session.get_output`
pub const GET_OUTPUT: &str = "session.get_output";
/// `session.send_to`
pub const SEND_TO: &str = "session.send_to";
/// `session.get_diff`
pub const GET_DIFF: &str = "session.get_diff";
/// `session.run_in_worktree`
pub const RUN_IN_WORKTREE: &str = "session.run_in_worktree";
/// `server.ping`
pub const PING: &str = "server.ping";
/// `server.status`
pub const STATUS: &str = "server.status";

/// Params naming a single session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionIdParams {
    /// Target session.
    pub session_id: String,
}

/// Params for `session.get_output`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputParams {
    /// Target session.
    pub session_id: String,
    /// Scrollback lines to return.
    #[serde(default = "default_lines")]
    pub lines: u32,
}

fn default_lines() -> u32 {
    DEFAULT_OUTPUT_LINES
}

/// Params for `session.send_to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendParams {
    /// Target session.
    pub session_id: String,
    /// Text typed into the pane.
    pub text: String,
}

/// Result of `session.send_to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResult {
    /// Always `true` on success.
    pub sent: bool,
}

/// Params for `session.run_in_worktree`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunParams {
    /// Target session.
    pub session_id: String,
    /// Shell-quoted command line; split, never passed to a shell.
    pub command: String,
}

/// Params for methods that take none.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoParams {}

/// Build the registry holding every daemon method.
///
/// # Errors
///
/// Returns `AppError::Config` if a method name is malformed or duplicated.
pub fn register_all() -> Result<MethodRegistry> {
    let mut registry = MethodRegistry::new();

    registry.register(
        START_CODING,
        |ctx: Arc<DispatchContext>, p: StartCodingRequest| async move {
            ctx.api.start_coding(p).await
        },
    )?;
    registry.register(STOP, |ctx: Arc<DispatchContext>, p: SessionIdParams| async move {
        ctx.api.stop(p.session_id).await
    })?;
    registry.register(PAUSE, |ctx: Arc<DispatchContext>, p: SessionIdParams| async move {
        ctx.api.pause(p.session_id).await
    })?;
    registry.register(RESUME, |ctx: Arc<DispatchContext>, p: SessionIdParams| async move {
        ctx.api.resume(p.session_id).await
    })?;
    registry.register(ARCHIVE, |ctx: Arc<DispatchContext>, p: SessionIdParams| async move {
        ctx.api.archive(p.session_id).await
    })?;
    registry.register(GET, |ctx: Arc<DispatchContext>, p: SessionIdParams| async move {
        ctx.api.get(p.session_id).await
    })?;
    registry.register(LIST, |ctx: Arc<DispatchContext>, p: SessionFilter| async move {
        ctx.api.list(p).await
    })?;
    registry.register(
        CHECK_LIVENESS,
        |ctx: Arc<DispatchContext>, p: SessionIdParams| async move {
            ctx.api.check_liveness(p.session_id).await
        },
    )?;
    registry.register(GET_OUTPUT, |ctx: Arc<DispatchContext>, p: OutputParams| async move {
        ctx.api.get_output(p.session_id, p.lines).await
    })?;
    registry.register(SEND_TO, |ctx: Arc<DispatchContext>, p: SendParams| async move {
        ctx.api
            .send_to(p.session_id, p.text)
            .await
            .map(|()| SendResult { sent: true })
    })?;
    registry.register(GET_DIFF, |ctx: Arc<DispatchContext>, p: SessionIdParams| async move {
        ctx.api.get_diff(p.session_id).await
    })?;
    registry.register(
        RUN_IN_WORKTREE,
        |ctx: Arc<DispatchContext>, p: RunParams| async move {
            ctx.api.run_in_worktree(p.session_id, p.command).await
        },
    )?;
    registry.register(PING, |ctx: Arc<DispatchContext>, _: NoParams| async move {
        ctx.api.ping().await
    })?;
    registry.register(STATUS, |ctx: Arc<DispatchContext>, _: NoParams| async move {
        ctx.api.status().await.map(|mut status| {
            status.connections = ctx.connections.load(Ordering::Relaxed);
            status
        })
    })?;

    Ok(registry)
}
