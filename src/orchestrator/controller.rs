//! Session controller: the authoritative lifecycle state machine.
//!
//! Every session lives in a [`SessionSlot`]: a `tokio::sync::Mutex` that
//! serializes transitions, plus a snapshot that readers (`get`, `list`,
//! `status`) use without waiting behind an in-flight transition. A caller
//! that waited on the mutex re-checks the state it finds, so a `stop` queued
//! behind a failing `start` sees `failed` and is rejected.
//!
//! Each committed transition is persisted before it becomes visible and is
//! broadcast as a [`SessionEvent`].

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{error, info, info_span, warn, Instrument};

use crate::api::{
    ApiFuture, LivenessReport, ServerStatus, SessionApi, SessionFilter, StartCodingRequest,
};
use crate::config::AgentConfig;
use crate::models::event::{SessionEvent, StateChanged};
use crate::models::session::{NewSession, Session, SessionState};
use crate::persistence::db::Database;
use crate::persistence::session_repo::SessionRepo;
use crate::resources::{LaunchSpec, ResourceManager};
use crate::{AppError, GlobalConfig, Result};

use super::reconcile::{self, Plan};
use super::REQUEST_ORIGIN;

/// Capacity of the state-change broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Default scrollback returned by `get_output`.
pub const DEFAULT_OUTPUT_LINES: u32 = 50;

/// Deadline for a `run_in_worktree` command.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(60);

/// Characters of `run_in_worktree` output returned to the caller.
pub const RUN_OUTPUT_LIMIT: usize = 10_000;

/// Per-session lock plus a lock-free-to-read snapshot.
struct SessionSlot {
    session: Mutex<Session>,
    view: RwLock<Session>,
}

impl SessionSlot {
    fn new(session: Session) -> Arc<Self> {
        Arc::new(Self {
            view: RwLock::new(session.clone()),
            session: Mutex::new(session),
        })
    }
}

/// Resources created so far by an in-progress start, for rollback.
#[derive(Default)]
struct Created {
    workspace: bool,
    pane: bool,
}

/// Owns every session and drives its resources.
pub struct SessionController {
    config: Arc<GlobalConfig>,
    repo: SessionRepo,
    resources: Arc<dyn ResourceManager>,
    slots: RwLock<HashMap<String, Arc<SessionSlot>>>,
    admission: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
    started_at: DateTime<Utc>,
}

impl SessionController {
    /// Build a controller with an empty registry. Call [`Self::restore`]
    /// before serving clients.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        db: Arc<Database>,
        resources: Arc<dyn ResourceManager>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            repo: SessionRepo::new(db),
            resources,
            slots: RwLock::new(HashMap::new()),
            admission: Mutex::new(()),
            events,
            started_at: Utc::now(),
        }
    }

    /// Receive every committed state change.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Sender side of the event channel, for components that subscribe
    /// per client.
    #[must_use]
    pub fn events(&self) -> broadcast::Sender<SessionEvent> {
        self.events.clone()
    }

    /// Daemon configuration.
    #[must_use]
    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    // ── Registry ────────────────────────────────────────────────

    async fn slot(&self, session_id: &str) -> Result<Arc<SessionSlot>> {
        self.slots
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_owned()))
    }

    async fn view(&self, session_id: &str) -> Result<Session> {
        let slot = self.slot(session_id).await?;
        let view = slot.view.read().await.clone();
        Ok(view)
    }

    async fn all_slots(&self) -> Vec<Arc<SessionSlot>> {
        self.slots.read().await.values().cloned().collect()
    }

    /// Rebuild the registry from the store, reconciling every non-terminal
    /// session against the host. Returns the number of sessions loaded.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the store cannot be read.
    pub async fn restore(&self) -> Result<usize> {
        let span = info_span!("session_restore");
        async move {
            let sessions = self.repo.list(&SessionFilter::default()).await?;
            let total = sessions.len();
            let mut changed = 0usize;

            for session in sessions {
                let id = session.id.clone();
                let slot = SessionSlot::new(session);
                self.slots.write().await.insert(id.clone(), Arc::clone(&slot));

                let mut session = slot.session.lock().await;
                let plan = reconcile::assess(self.resources.as_ref(), &session).await;
                if plan != Plan::Keep {
                    changed += 1;
                }
                if let Err(err) = self.apply_plan(&slot, &mut session, plan).await {
                    error!(session_id = %id, %err, "failed to reconcile session");
                }
            }

            info!(total, changed, "session registry restored");
            Ok(total)
        }
        .instrument(span)
        .await
    }

    async fn apply_plan(&self, slot: &SessionSlot, session: &mut Session, plan: Plan) -> Result<()> {
        match plan {
            Plan::Keep => Ok(()),
            Plan::AbortStart(reason) => {
                if let Some(handle) = session.process {
                    let _ = self
                        .resources
                        .terminate_process(handle, self.config.grace_period())
                        .await;
                }
                self.rollback(
                    session,
                    &Created {
                        workspace: true,
                        pane: true,
                    },
                )
                .await;
                if session.state == SessionState::Created {
                    self.commit(slot, session, SessionState::Starting, None, |_| {})
                        .await?;
                }
                self.commit(slot, session, SessionState::Failed, Some(reason), |s| {
                    s.process = None;
                })
                .await
            }
            Plan::Fail(reason) => {
                self.commit(slot, session, SessionState::Failed, Some(reason), |s| {
                    s.process = None;
                })
                .await
            }
            Plan::FinishStop => {
                if let Some(handle) = session.process {
                    if let Err(err) = self
                        .resources
                        .terminate_process(handle, self.config.grace_period())
                        .await
                    {
                        self.fail(slot, session, &err).await;
                        return Err(err);
                    }
                }
                self.commit(slot, session, SessionState::Stopped, None, |s| {
                    s.process = None;
                })
                .await
            }
        }
    }

    // ── Transitions ─────────────────────────────────────────────

    /// Persist `session` moved to `next` (after `apply`), then publish the
    /// snapshot and broadcast the change. On store failure nothing changes.
    async fn commit(
        &self,
        slot: &SessionSlot,
        session: &mut Session,
        next: SessionState,
        reason: Option<String>,
        apply: impl FnOnce(&mut Session),
    ) -> Result<()> {
        if !session.can_transition_to(next) {
            return Err(AppError::Internal(format!(
                "illegal transition {} -> {next} for session {}",
                session.state, session.id
            )));
        }

        let previous = session.state;
        let mut candidate = session.clone();
        candidate.state = next;
        candidate.updated_at = Utc::now();
        if reason.is_some() {
            candidate.last_error.clone_from(&reason);
        }
        apply(&mut candidate);

        self.repo.update(&candidate).await?;
        *session = candidate;
        self.publish(slot, session, previous, reason).await;
        Ok(())
    }

    /// Expose `session` to readers and broadcast its move from `previous`.
    async fn publish(
        &self,
        slot: &SessionSlot,
        session: &Session,
        previous: SessionState,
        reason: Option<String>,
    ) {
        *slot.view.write().await = session.clone();

        let next = session.state;
        info!(session_id = %session.id, from = %previous, to = %next, "session transition");
        let origin = REQUEST_ORIGIN.try_with(|id| *id).ok();
        let _ = self.events.send(SessionEvent {
            origin,
            change: StateChanged {
                session_id: session.id.clone(),
                task_id: session.task_id.clone(),
                previous,
                state: next,
                reason,
                at: session.updated_at,
            },
        });
    }

    /// Move to `failed`, killing any process still attached.
    ///
    /// If the store rejects the write the session is still failed in memory;
    /// the persisted row is reconciled on the next restore.
    async fn fail(&self, slot: &SessionSlot, session: &mut Session, err: &AppError) {
        if let Some(handle) = session.process {
            if let Err(kill_err) = self
                .resources
                .terminate_process(handle, self.config.grace_period())
                .await
            {
                warn!(session_id = %session.id, %kill_err, "could not terminate process of failing session");
            }
        }
        if let Err(commit_err) = self
            .commit(slot, session, SessionState::Failed, Some(err.to_string()), |s| {
                s.process = None;
            })
            .await
        {
            error!(session_id = %session.id, %commit_err, "failed to record session failure");
            if session.can_transition_to(SessionState::Failed) {
                let previous = session.state;
                session.state = SessionState::Failed;
                session.process = None;
                session.last_error = Some(err.to_string());
                session.updated_at = Utc::now();
                self.publish(slot, session, previous, Some(err.to_string()))
                    .await;
            }
        }
    }

    /// Record `err` on the session without changing state.
    async fn note_error(&self, slot: &SessionSlot, session: &mut Session, err: &AppError) {
        session.last_error = Some(err.to_string());
        session.updated_at = Utc::now();
        if let Err(db_err) = self.repo.update(session).await {
            error!(session_id = %session.id, %db_err, "failed to record session error");
        }
        *slot.view.write().await = session.clone();
    }

    /// Destroy whatever a start created, newest first. Errors are logged.
    async fn rollback(&self, session: &Session, created: &Created) {
        if created.pane {
            if let Some(target) = session.pane_target.as_deref() {
                if let Err(err) = self.resources.destroy_pane(target).await {
                    warn!(session_id = %session.id, %err, "rollback: pane destroy failed");
                }
            }
        }
        if created.workspace {
            if let Err(err) = self
                .resources
                .destroy_workspace(&session.repo_path, &session.workspace_path)
                .await
            {
                warn!(session_id = %session.id, %err, "rollback: workspace destroy failed");
            }
        }
    }

    fn invalid(session: &Session, operation: &str) -> AppError {
        AppError::InvalidTransition(format!(
            "cannot {operation} session {} in state {}",
            session.id, session.state
        ))
    }

    // ── Operations ──────────────────────────────────────────────

    /// Admit, record and start a new session.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidParams` for an empty task, unknown backend or
    ///   missing repository.
    /// - `AppError::ResourceBusy` when `max_concurrent_sessions` is reached.
    /// - The failing resource error (its message prefixed with the session
    ///   id) when the start is rolled back; the session is then `failed`.
    pub async fn start_session(&self, request: StartCodingRequest) -> Result<Session> {
        let span = info_span!("session_start", task_id = %request.task_id);
        async move {
            let (spec, agent) = self.prepare(request).await?;

            let slot = {
                let _admit = self.admission.lock().await;
                let live = self.repo.count_live().await?;
                if live >= u64::from(self.config.max_concurrent_sessions) {
                    return Err(AppError::ResourceBusy(format!(
                        "{live} sessions already live (limit {})",
                        self.config.max_concurrent_sessions
                    )));
                }

                let mut session = Session::new(spec.clone(), false);
                if self
                    .repo
                    .names_in_use(&session.workspace_path, &session.branch)
                    .await?
                {
                    session = Session::new(spec, true);
                    if self
                        .repo
                        .names_in_use(&session.workspace_path, &session.branch)
                        .await?
                    {
                        return Err(AppError::ResourceBusy(format!(
                            "workspace {} is taken",
                            session.workspace_path.display()
                        )));
                    }
                }

                self.repo.insert(&session).await?;
                let slot = SessionSlot::new(session.clone());
                self.slots
                    .write()
                    .await
                    .insert(session.id.clone(), Arc::clone(&slot));
                slot
            };

            let mut session = slot.session.lock().await;
            self.run_start(&slot, &mut session, &agent)
                .await
                .map_err(|err| {
                    AppError::from_kind(
                        err.kind(),
                        format!("session {}: {}", session.id, err.message()),
                    )
                })?;
            Ok(session.clone())
        }
        .instrument(span)
        .await
    }

    /// Validate a start request and resolve defaults.
    async fn prepare(&self, request: StartCodingRequest) -> Result<(NewSession, AgentConfig)> {
        if request.task_id.trim().is_empty() {
            return Err(AppError::InvalidParams("task_id must not be empty".into()));
        }
        let tag = request
            .agent
            .unwrap_or_else(|| self.config.default_agent.clone());
        let agent = self.config.agent(&tag)?.clone();

        let repo = request
            .repo_path
            .or_else(|| self.config.default_repo.clone())
            .ok_or_else(|| AppError::InvalidParams("repo_path is required".into()))?;
        let repo = tokio::fs::canonicalize(&repo).await.map_err(|err| {
            AppError::InvalidParams(format!("repo_path {}: {err}", repo.display()))
        })?;

        let worktree_parent = self.worktree_parent(&repo);
        Ok((
            NewSession {
                task_id: request.task_id,
                agent: tag,
                repo_path: repo,
                base_ref: request
                    .base_ref
                    .unwrap_or_else(|| self.config.base_ref.clone()),
                worktree_parent,
                pane_prefix: self
                    .config
                    .tmux
                    .enabled
                    .then(|| self.config.tmux.session_prefix.clone()),
                prompt: request.prompt,
                model: request.model,
            },
            agent,
        ))
    }

    /// `<worktree_root>/<repo name>` or `<repo>-worktrees` beside the repo.
    fn worktree_parent(&self, repo: &std::path::Path) -> PathBuf {
        let name = repo
            .file_name()
            .map_or_else(|| "repo".to_owned(), |n| n.to_string_lossy().into_owned());
        match &self.config.worktree_root {
            Some(root) => root.join(name),
            None => repo.with_file_name(format!("{name}-worktrees")),
        }
    }

    async fn run_start(
        &self,
        slot: &SessionSlot,
        session: &mut Session,
        agent: &AgentConfig,
    ) -> Result<()> {
        if session.state != SessionState::Created {
            return Err(Self::invalid(session, "start"));
        }
        self.commit(slot, session, SessionState::Starting, None, |_| {})
            .await?;

        let mut created = Created::default();

        if let Err(err) = self
            .resources
            .create_workspace(
                &session.repo_path,
                &session.workspace_path,
                &session.branch,
                &session.base_ref,
            )
            .await
        {
            self.fail(slot, session, &err).await;
            return Err(err);
        }
        created.workspace = true;

        if let Some(target) = session.pane_target.clone() {
            if let Err(err) = self
                .resources
                .create_pane(&target, &session.workspace_path)
                .await
            {
                self.rollback(session, &created).await;
                self.fail(slot, session, &err).await;
                return Err(err);
            }
            created.pane = true;
        }

        let launch = self.launch_spec(session, agent);
        match self.resources.spawn_process(launch).await {
            Ok(handle) => {
                if let Err(err) = self
                    .commit(slot, session, SessionState::Running, None, |s| {
                        s.process = Some(handle);
                        s.last_error = None;
                    })
                    .await
                {
                    error!(session_id = %session.id, pid = handle.pid, %err, "could not record running session");
                    if let Err(kill_err) = self
                        .resources
                        .terminate_process(handle, self.config.grace_period())
                        .await
                    {
                        warn!(session_id = %session.id, %kill_err, "rollback: terminate failed");
                    }
                    self.rollback(session, &created).await;
                    self.fail(slot, session, &err).await;
                    return Err(err);
                }
                info!(session_id = %session.id, pid = handle.pid, "session running");
                Ok(())
            }
            Err(err) => {
                self.rollback(session, &created).await;
                self.fail(slot, session, &err).await;
                Err(err)
            }
        }
    }

    fn launch_spec(&self, session: &Session, agent: &AgentConfig) -> LaunchSpec {
        let mut env = agent.env.clone();
        env.insert("AGENTBENCH_SESSION_ID".into(), session.id.clone());
        env.insert("AGENTBENCH_TASK_ID".into(), session.task_id.clone());
        env.insert(
            "AGENTBENCH_WORKSPACE".into(),
            session.workspace_path.to_string_lossy().into_owned(),
        );
        LaunchSpec {
            session_id: session.id.clone(),
            program: agent.program.clone(),
            args: agent.command_args(
                &session.id,
                session.model.as_deref(),
                session.prompt.as_deref(),
            ),
            cwd: session.workspace_path.clone(),
            env,
            pane_target: session.pane_target.clone(),
        }
    }

    /// Terminate the agent process; workspace and pane stay.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidTransition` from `created`, `failed` or `archived`;
    /// the termination error if the process cannot be killed (the session
    /// is then `failed`).
    pub async fn stop_session(&self, session_id: &str) -> Result<Session> {
        let span = info_span!("session_stop", session_id);
        async move {
            let slot = self.slot(session_id).await?;
            let mut session = slot.session.lock().await;
            match session.state {
                SessionState::Stopped => return Ok(session.clone()),
                SessionState::Running | SessionState::Paused | SessionState::Starting => {}
                _ => return Err(Self::invalid(&session, "stop")),
            }

            self.commit(&slot, &mut session, SessionState::Stopping, None, |_| {})
                .await?;

            if let Some(handle) = session.process {
                match self
                    .resources
                    .terminate_process(handle, self.config.grace_period())
                    .await
                {
                    Ok(outcome) => info!(pid = handle.pid, ?outcome, "agent process terminated"),
                    Err(err) => {
                        self.fail(&slot, &mut session, &err).await;
                        return Err(err);
                    }
                }
            }

            self.commit(&slot, &mut session, SessionState::Stopped, None, |s| {
                s.process = None;
            })
            .await?;
            Ok(session.clone())
        }
        .instrument(span)
        .await
    }

    /// Suspend the agent process. Pausing a paused session is a no-op.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidTransition` unless `running` or `paused`; the
    /// signal error if the process is gone (the session is then `failed`).
    pub async fn pause_session(&self, session_id: &str) -> Result<Session> {
        let span = info_span!("session_pause", session_id);
        async move {
            let slot = self.slot(session_id).await?;
            let mut session = slot.session.lock().await;
            match (session.state, session.process) {
                (SessionState::Paused, _) => Ok(session.clone()),
                (SessionState::Running, Some(handle)) => {
                    if let Err(err) = self.resources.suspend_process(handle).await {
                        self.fail(&slot, &mut session, &err).await;
                        return Err(err);
                    }
                    self.commit(&slot, &mut session, SessionState::Paused, None, |_| {})
                        .await?;
                    Ok(session.clone())
                }
                _ => Err(Self::invalid(&session, "pause")),
            }
        }
        .instrument(span)
        .await
    }

    /// Continue a paused agent. Resuming a running session is a no-op.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidTransition` unless `running` or `paused`; the
    /// signal error if the process is gone (the session is then `failed`).
    pub async fn resume_session(&self, session_id: &str) -> Result<Session> {
        let span = info_span!("session_resume", session_id);
        async move {
            let slot = self.slot(session_id).await?;
            let mut session = slot.session.lock().await;
            match (session.state, session.process) {
                (SessionState::Running, _) => Ok(session.clone()),
                (SessionState::Paused, Some(handle)) => {
                    if let Err(err) = self.resources.resume_process(handle).await {
                        self.fail(&slot, &mut session, &err).await;
                        return Err(err);
                    }
                    self.commit(&slot, &mut session, SessionState::Running, None, |_| {})
                        .await?;
                    Ok(session.clone())
                }
                _ => Err(Self::invalid(&session, "resume")),
            }
        }
        .instrument(span)
        .await
    }

    /// Remove pane and workspace of a stopped or failed session; the branch
    /// and record remain. Archiving an archived session is a no-op.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidTransition` from any other state; the destroy error
    /// if a resource cannot be removed (state unchanged, error recorded).
    pub async fn archive_session(&self, session_id: &str) -> Result<Session> {
        let span = info_span!("session_archive", session_id);
        async move {
            let slot = self.slot(session_id).await?;
            let mut session = slot.session.lock().await;
            match session.state {
                SessionState::Archived => return Ok(session.clone()),
                SessionState::Stopped | SessionState::Failed => {}
                _ => return Err(Self::invalid(&session, "archive")),
            }

            if let Some(target) = session.pane_target.clone() {
                match self.resources.destroy_pane(&target).await {
                    Ok(removal) => info!(target, ?removal, "pane released"),
                    Err(err) => {
                        self.note_error(&slot, &mut session, &err).await;
                        return Err(err);
                    }
                }
            }

            match self
                .resources
                .destroy_workspace(&session.repo_path, &session.workspace_path)
                .await
            {
                Ok(removal) => info!(path = %session.workspace_path.display(), ?removal, "workspace released"),
                Err(err) => {
                    self.note_error(&slot, &mut session, &err).await;
                    return Err(err);
                }
            }

            self.commit(&slot, &mut session, SessionState::Archived, None, |s| {
                s.process = None;
            })
            .await?;
            Ok(session.clone())
        }
        .instrument(span)
        .await
    }

    /// Probe all three resources now. A `running`/`paused` session whose
    /// process is gone moves to `failed`.
    ///
    /// # Errors
    ///
    /// `AppError::SessionNotFound`, or a probe error.
    pub async fn check_session_liveness(&self, session_id: &str) -> Result<LivenessReport> {
        let slot = self.slot(session_id).await?;
        let mut session = slot.session.lock().await;

        let process_alive = match session.process {
            Some(handle) => self.resources.process_alive(handle).await?,
            None => false,
        };
        if matches!(session.state, SessionState::Running | SessionState::Paused) && !process_alive
        {
            self.fail(
                &slot,
                &mut session,
                &AppError::Resource("agent process exited unexpectedly".into()),
            )
            .await;
        }

        let pane_present = match session.pane_target.as_deref() {
            Some(target) => self.resources.pane_exists(target).await?,
            None => false,
        };
        let workspace_present = self
            .resources
            .workspace_exists(&session.workspace_path)
            .await?;

        Ok(LivenessReport {
            session_id: session.id.clone(),
            state: session.state,
            process_alive,
            pane_present,
            workspace_present,
        })
    }

    /// One background liveness pass. Sessions mid-transition are skipped
    /// until the next pass. Returns how many sessions were failed.
    pub async fn sweep_liveness(&self) -> usize {
        let mut failed = 0usize;
        for slot in self.all_slots().await {
            let Ok(mut session) = slot.session.try_lock() else {
                continue;
            };
            let Some(handle) = session.process else {
                continue;
            };
            if !matches!(session.state, SessionState::Running | SessionState::Paused) {
                continue;
            }
            match self.resources.process_alive(handle).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(session_id = %session.id, pid = handle.pid, "agent process gone");
                    self.fail(
                        &slot,
                        &mut session,
                        &AppError::Resource("agent process exited unexpectedly".into()),
                    )
                    .await;
                    failed += 1;
                }
                Err(err) => warn!(session_id = %session.id, %err, "liveness probe failed"),
            }
        }
        failed
    }

    /// Fetch one session snapshot.
    ///
    /// # Errors
    ///
    /// `AppError::SessionNotFound` if the id is unknown.
    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        self.view(session_id).await
    }

    /// Snapshots matching `filter`, oldest first.
    pub async fn list_sessions(&self, filter: &SessionFilter) -> Vec<Session> {
        let mut sessions = Vec::new();
        for slot in self.all_slots().await {
            let view = slot.view.read().await;
            if filter.matches(&view) {
                sessions.push(view.clone());
            }
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        sessions
    }

    /// Pane scrollback of a session that still has its pane.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidTransition` once archived; `AppError::Resource` if
    /// the session runs without a pane or tmux fails.
    pub async fn session_output(&self, session_id: &str, lines: u32) -> Result<String> {
        let session = self.view(session_id).await?;
        if session.state == SessionState::Archived {
            return Err(Self::invalid(&session, "read output of"));
        }
        let target = session
            .pane_target
            .ok_or_else(|| AppError::Resource(format!("session {session_id} has no pane")))?;
        self.resources.capture_pane(&target, lines.max(1)).await
    }

    /// Type into the pane of a running or paused session.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidParams` for empty text; `AppError::InvalidTransition`
    /// unless `running`/`paused`; `AppError::Resource` without a pane.
    pub async fn send_to_session(&self, session_id: &str, text: &str) -> Result<()> {
        if text.is_empty() {
            return Err(AppError::InvalidParams("text must not be empty".into()));
        }
        let session = self.view(session_id).await?;
        if !matches!(session.state, SessionState::Running | SessionState::Paused) {
            return Err(Self::invalid(&session, "send input to"));
        }
        let target = session
            .pane_target
            .ok_or_else(|| AppError::Resource(format!("session {session_id} has no pane")))?;
        self.resources.send_keys(&target, text).await
    }

    /// Uncommitted changes in the session worktree.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidTransition` unless the workspace can exist;
    /// `AppError::Resource` if git fails.
    pub async fn session_diff(&self, session_id: &str) -> Result<String> {
        let session = self.view(session_id).await?;
        if matches!(session.state, SessionState::Created | SessionState::Archived) {
            return Err(Self::invalid(&session, "diff"));
        }
        self.resources.workspace_diff(&session.workspace_path).await
    }

    /// Run a command line in the session worktree, capped at
    /// [`RUN_OUTPUT_LIMIT`] characters of combined output.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidParams` if `command` is empty or badly quoted.
    /// - `AppError::InvalidTransition` unless the workspace can exist.
    /// - `AppError::Resource` if the worktree is gone or the program cannot
    ///   start; `AppError::Timeout` after [`RUN_TIMEOUT`].
    pub async fn run_in_worktree(&self, session_id: &str, command: &str) -> Result<String> {
        let session = self.view(session_id).await?;
        let argv = shlex::split(command)
            .ok_or_else(|| AppError::InvalidParams(format!("invalid command syntax: {command}")))?;
        if argv.is_empty() {
            return Err(AppError::InvalidParams("command must not be empty".into()));
        }
        if matches!(session.state, SessionState::Created | SessionState::Archived) {
            return Err(Self::invalid(&session, "run a command in"));
        }
        if !self
            .resources
            .workspace_exists(&session.workspace_path)
            .await?
        {
            return Err(AppError::Resource(format!(
                "workspace {} does not exist",
                session.workspace_path.display()
            )));
        }

        info!(session_id, program = %argv[0], "running command in worktree");
        let output = self
            .resources
            .run_in_workspace(&session.workspace_path, &argv, RUN_TIMEOUT)
            .await?;
        Ok(truncate_chars(output, RUN_OUTPUT_LIMIT))
    }

    /// Daemon summary; `connections` is filled in by the transport.
    pub async fn server_status(&self) -> ServerStatus {
        let mut sessions: BTreeMap<String, usize> = BTreeMap::new();
        for slot in self.all_slots().await {
            let state = slot.view.read().await.state;
            *sessions.entry(state.as_str().to_owned()).or_default() += 1;
        }
        ServerStatus {
            status: "running".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            pid: std::process::id(),
            started_at: self.started_at,
            socket_path: self.config.socket_path.clone(),
            connections: 0,
            sessions,
        }
    }
}

impl SessionApi for SessionController {
    fn start_coding(&self, request: StartCodingRequest) -> ApiFuture<'_, Session> {
        Box::pin(self.start_session(request))
    }

    fn stop(&self, session_id: String) -> ApiFuture<'_, Session> {
        Box::pin(async move { self.stop_session(&session_id).await })
    }

    fn pause(&self, session_id: String) -> ApiFuture<'_, Session> {
        Box::pin(async move { self.pause_session(&session_id).await })
    }

    fn resume(&self, session_id: String) -> ApiFuture<'_, Session> {
        Box::pin(async move { self.resume_session(&session_id).await })
    }

    fn archive(&self, session_id: String) -> ApiFuture<'_, Session> {
        Box::pin(async move { self.archive_session(&session_id).await })
    }

    fn get(&self, session_id: String) -> ApiFuture<'_, Session> {
        Box::pin(async move { self.get_session(&session_id).await })
    }

    fn list(&self, filter: SessionFilter) -> ApiFuture<'_, Vec<Session>> {
        Box::pin(async move { Ok(self.list_sessions(&filter).await) })
    }

    fn check_liveness(&self, session_id: String) -> ApiFuture<'_, LivenessReport> {
        Box::pin(async move { self.check_session_liveness(&session_id).await })
    }

    fn get_output(&self, session_id: String, lines: u32) -> ApiFuture<'_, String> {
        Box::pin(async move { self.session_output(&session_id, lines).await })
    }

    fn send_to(&self, session_id: String, text: String) -> ApiFuture<'_, ()> {
        Box::pin(async move { self.send_to_session(&session_id, &text).await })
    }

    fn get_diff(&self, session_id: String) -> ApiFuture<'_, String> {
        Box::pin(async move { self.session_diff(&session_id).await })
    }

    fn run_in_worktree(&self, session_id: String, command: String) -> ApiFuture<'_, String> {
        Box::pin(async move { self.run_in_worktree(&session_id, &command).await })
    }

    fn ping(&self) -> ApiFuture<'_, String> {
        Box::pin(async { Ok("pong".to_owned()) })
    }

    fn status(&self) -> ApiFuture<'_, ServerStatus> {
        Box::pin(async move { Ok(self.server_status().await) })
    }
}

fn truncate_chars(mut text: String, limit: usize) -> String {
    if let Some((cut, _)) = text.char_indices().nth(limit) {
        text.truncate(cut);
    }
    text
}
