//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS`, so the
//! bootstrap re-runs on every daemon startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS session (
    id              TEXT PRIMARY KEY NOT NULL,
    task_id         TEXT NOT NULL,
    agent           TEXT NOT NULL,
    display_name    TEXT NOT NULL,
    state           TEXT NOT NULL CHECK(state IN ('created','starting','running','paused','stopping','stopped','archived','failed')),
    repo_path       TEXT NOT NULL,
    base_ref        TEXT NOT NULL,
    workspace_path  TEXT NOT NULL,
    branch          TEXT NOT NULL,
    pane_target     TEXT,
    pid             INTEGER,
    prompt          TEXT,
    model           TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    last_error      TEXT
);

CREATE INDEX IF NOT EXISTS idx_session_task ON session(task_id);
CREATE INDEX IF NOT EXISTS idx_session_state ON session(state);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
