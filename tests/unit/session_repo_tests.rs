//! `SQLite` session store.

use std::path::PathBuf;
use std::sync::Arc;

use agentbench::api::SessionFilter;
use agentbench::models::session::{NewSession, ProcessHandle, Session, SessionState};
use agentbench::persistence::{db, session_repo::SessionRepo};
use agentbench::AppError;

fn new_session(task: &str) -> Session {
    Session::new(
        NewSession {
            task_id: task.into(),
            agent: "claude_code".into(),
            repo_path: PathBuf::from("/src/project"),
            base_ref: "HEAD".into(),
            worktree_parent: PathBuf::from("/src/project-worktrees"),
            pane_prefix: Some("ab".into()),
            prompt: Some("write tests".into()),
            model: Some("opus".into()),
        },
        false,
    )
}

async fn repo() -> SessionRepo {
    let db = db::connect_memory().await.expect("db connect");
    SessionRepo::new(Arc::new(db))
}

#[tokio::test]
async fn insert_then_get_round_trips_every_field() {
    let repo = repo().await;
    let session = new_session("task-1");
    repo.insert(&session).await.expect("insert");

    let loaded = repo
        .get_by_id(&session.id)
        .await
        .expect("query")
        .expect("row present");
    assert_eq!(loaded, session);
}

#[tokio::test]
async fn get_missing_is_none() {
    let repo = repo().await;
    assert!(repo.get_by_id("nope").await.expect("query").is_none());
}

#[tokio::test]
async fn update_persists_runtime_fields() {
    let repo = repo().await;
    let mut session = new_session("task-1");
    repo.insert(&session).await.expect("insert");

    session.state = SessionState::Running;
    session.process = Some(ProcessHandle { pid: 31337 });
    session.last_error = Some("transient".into());
    session.updated_at = chrono::Utc::now();
    repo.update(&session).await.expect("update");

    let loaded = repo
        .get_by_id(&session.id)
        .await
        .expect("query")
        .expect("row present");
    assert_eq!(loaded.state, SessionState::Running);
    assert_eq!(loaded.process, Some(ProcessHandle { pid: 31337 }));
    assert_eq!(loaded.last_error.as_deref(), Some("transient"));
}

#[tokio::test]
async fn update_unknown_session_is_not_found() {
    let repo = repo().await;
    let session = new_session("task-1");
    let err = repo.update(&session).await.expect_err("no row");
    assert!(matches!(err, AppError::SessionNotFound(_)));
}

#[tokio::test]
async fn list_filters_by_task_and_state() {
    let repo = repo().await;
    let a = new_session("task-a");
    let mut b = new_session("task-a");
    b.state = SessionState::Failed;
    let c = new_session("task-c");
    for session in [&a, &b, &c] {
        repo.insert(session).await.expect("insert");
    }

    let all = repo.list(&SessionFilter::default()).await.expect("list all");
    assert_eq!(all.len(), 3);

    let task_a = repo
        .list(&SessionFilter {
            task_id: Some("task-a".into()),
            states: None,
        })
        .await
        .expect("list task");
    assert_eq!(task_a.len(), 2);
    assert!(task_a.iter().all(|s| s.task_id == "task-a"));

    let failed = repo
        .list(&SessionFilter {
            task_id: Some("task-a".into()),
            states: Some(vec![SessionState::Failed]),
        })
        .await
        .expect("list failed");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, b.id);
}

#[tokio::test]
async fn count_live_excludes_terminal_states() {
    let repo = repo().await;
    let states = [
        SessionState::Created,
        SessionState::Running,
        SessionState::Paused,
        SessionState::Stopped,
        SessionState::Failed,
        SessionState::Archived,
    ];
    for state in states {
        let mut session = new_session("task-1");
        session.state = state;
        repo.insert(&session).await.expect("insert");
    }
    assert_eq!(repo.count_live().await.expect("count"), 3);
}

#[tokio::test]
async fn names_in_use_tracks_workspace_and_branch() {
    let repo = repo().await;
    let mut session = new_session("task-1");
    repo.insert(&session).await.expect("insert");

    assert!(repo
        .names_in_use(&session.workspace_path, "session/unrelated")
        .await
        .expect("query"));
    assert!(repo
        .names_in_use(&PathBuf::from("/elsewhere"), &session.branch)
        .await
        .expect("query"));
    assert!(!repo
        .names_in_use(&PathBuf::from("/elsewhere"), "session/unrelated")
        .await
        .expect("query"));

    // An archived session frees its path but keeps its branch.
    session.state = SessionState::Archived;
    repo.update(&session).await.expect("update");
    assert!(!repo
        .names_in_use(&session.workspace_path, "session/unrelated")
        .await
        .expect("query"));
    assert!(repo
        .names_in_use(&PathBuf::from("/elsewhere"), &session.branch)
        .await
        .expect("query"));
}
