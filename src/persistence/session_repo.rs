//! Session repository for `SQLite` persistence.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::api::SessionFilter;
use crate::models::session::{ProcessHandle, Session, SessionState};
use crate::{AppError, Result};

use super::db::Database;

const SELECT_COLUMNS: &str = "SELECT id, task_id, agent, display_name, state, repo_path, base_ref,
        workspace_path, branch, pane_target, pid, prompt, model, created_at, updated_at, last_error
 FROM session";

/// Repository for session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    task_id: String,
    agent: String,
    display_name: String,
    state: String,
    repo_path: String,
    base_ref: String,
    workspace_path: String,
    branch: String,
    pane_target: Option<String>,
    pid: Option<i64>,
    prompt: Option<String>,
    model: Option<String>,
    created_at: String,
    updated_at: String,
    last_error: Option<String>,
}

impl SessionRow {
    fn into_session(self) -> Result<Session> {
        let state = SessionState::parse(&self.state)
            .ok_or_else(|| AppError::Db(format!("invalid session state: {}", self.state)))?;
        let process = self
            .pid
            .map(|pid| {
                u32::try_from(pid)
                    .map(|pid| ProcessHandle { pid })
                    .map_err(|_| AppError::Db(format!("invalid pid: {pid}")))
            })
            .transpose()?;

        Ok(Session {
            id: self.id,
            task_id: self.task_id,
            agent: self.agent,
            display_name: self.display_name,
            state,
            repo_path: PathBuf::from(self.repo_path),
            base_ref: self.base_ref,
            workspace_path: PathBuf::from(self.workspace_path),
            branch: self.branch,
            pane_target: self.pane_target,
            process,
            prompt: self.prompt,
            model: self.model,
            created_at: parse_time(&self.created_at, "created_at")?,
            updated_at: parse_time(&self.updated_at, "updated_at")?,
            last_error: self.last_error,
        })
    }
}

fn parse_time(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {column}: {e}")))
}

fn pid_value(session: &Session) -> Option<i64> {
    session.process.map(|handle| i64::from(handle.pid))
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn insert(&self, session: &Session) -> Result<()> {
        sqlx::query(
            "INSERT INTO session (id, task_id, agent, display_name, state, repo_path, base_ref,
                workspace_path, branch, pane_target, pid, prompt, model, created_at, updated_at,
                last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        )
        .bind(&session.id)
        .bind(&session.task_id)
        .bind(&session.agent)
        .bind(&session.display_name)
        .bind(session.state.as_str())
        .bind(session.repo_path.to_string_lossy().into_owned())
        .bind(&session.base_ref)
        .bind(session.workspace_path.to_string_lossy().into_owned())
        .bind(&session.branch)
        .bind(&session.pane_target)
        .bind(pid_value(session))
        .bind(&session.prompt)
        .bind(&session.model)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .bind(&session.last_error)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Persist the mutable runtime attributes of `session`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` if no row has that id, or
    /// `AppError::Db` if the update fails.
    pub async fn update(&self, session: &Session) -> Result<()> {
        let result = sqlx::query(
            "UPDATE session
             SET state = ?1, pane_target = ?2, pid = ?3, updated_at = ?4, last_error = ?5
             WHERE id = ?6",
        )
        .bind(session.state.as_str())
        .bind(&session.pane_target)
        .bind(pid_value(session))
        .bind(session.updated_at.to_rfc3339())
        .bind(&session.last_error)
        .bind(&session.id)
        .execute(self.db.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::SessionNotFound(session.id.clone()));
        }
        Ok(())
    }

    /// Retrieve a session by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(SessionRow::into_session).transpose()
    }

    /// List sessions matching `filter`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or a row is corrupt.
    pub async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = if let Some(task_id) = &filter.task_id {
            sqlx::query_as(&format!(
                "{SELECT_COLUMNS} WHERE task_id = ?1 ORDER BY created_at ASC"
            ))
            .bind(task_id)
            .fetch_all(self.db.as_ref())
            .await?
        } else {
            sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY created_at ASC"))
                .fetch_all(self.db.as_ref())
                .await?
        };

        let mut sessions = rows
            .into_iter()
            .map(SessionRow::into_session)
            .collect::<Result<Vec<_>>>()?;
        sessions.retain(|session| filter.matches(session));
        Ok(sessions)
    }

    /// Count sessions that hold or are about to hold an agent process.
    ///
    /// `created` rows are included: they exist only between admission and
    /// the first transition.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_live(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM session
             WHERE state IN ('created','starting','running','paused','stopping')",
        )
        .fetch_one(self.db.as_ref())
        .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Whether a non-archived session owns `workspace_path`, or any session
    /// ever used `branch` (branches outlive archiving).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn names_in_use(&self, workspace_path: &Path, branch: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM session
             WHERE (state != 'archived' AND workspace_path = ?1) OR branch = ?2",
        )
        .bind(workspace_path.to_string_lossy().into_owned())
        .bind(branch)
        .fetch_one(self.db.as_ref())
        .await?;
        Ok(count > 0)
    }
}
