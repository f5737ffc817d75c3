//! Registry rebuild after a daemon restart.

use std::sync::Arc;

use agentbench::api::SessionFilter;
use agentbench::models::session::{NewSession, ProcessHandle, Session, SessionState};
use agentbench::persistence::session_repo::SessionRepo;

use super::test_helpers::{harness, Harness, Op, ProcState};

fn persisted(h: &Harness, task: &str, state: SessionState, pid: Option<u32>) -> Session {
    let mut session = Session::new(
        NewSession {
            task_id: task.into(),
            agent: "claude_code".into(),
            repo_path: h.repo(),
            base_ref: "HEAD".into(),
            worktree_parent: h.dir.path().join("worktrees"),
            pane_prefix: Some("ab".into()),
            prompt: None,
            model: None,
        },
        false,
    );
    session.state = state;
    session.process = pid.map(|pid| ProcessHandle { pid });
    session
}

async fn seed(h: &Harness, sessions: &[&Session]) {
    let repo = SessionRepo::new(Arc::clone(&h.db));
    for session in sessions {
        repo.insert(session).await.expect("insert");
    }
}

#[tokio::test]
async fn restart_reconciles_every_state() {
    let h = harness().await;

    let interrupted_start = persisted(&h, "t-start", SessionState::Starting, None);
    let never_started = persisted(&h, "t-created", SessionState::Created, None);
    let interrupted_stop = persisted(&h, "t-stop", SessionState::Stopping, Some(50_001));
    let dead = persisted(&h, "t-dead", SessionState::Running, Some(50_002));
    let alive = persisted(&h, "t-alive", SessionState::Paused, Some(50_003));
    let archived = persisted(&h, "t-archived", SessionState::Archived, None);

    h.resources.adopt_resources(
        &interrupted_start.workspace_path,
        interrupted_start.pane_target.as_deref(),
    );
    h.resources.adopt_process(50_001);
    h.resources.adopt_process(50_003);
    h.resources
        .adopt_resources(&alive.workspace_path, alive.pane_target.as_deref());

    seed(
        &h,
        &[
            &interrupted_start,
            &never_started,
            &interrupted_stop,
            &dead,
            &alive,
            &archived,
        ],
    )
    .await;

    let controller = h.restarted();
    let loaded = controller.restore().await.expect("restore");
    assert_eq!(loaded, 6);

    let state = |id: &str| {
        let controller = Arc::clone(&controller);
        let id = id.to_owned();
        async move { controller.get_session(&id).await.expect("get") }
    };

    let s = state(&interrupted_start.id).await;
    assert_eq!(s.state, SessionState::Failed);
    assert!(s.last_error.is_some());
    assert!(!h.resources.has_workspace(&interrupted_start.workspace_path));
    assert!(h.resources.has_workspace(&alive.workspace_path));
    assert_eq!(h.resources.panes(), 1, "only the live session keeps its pane");

    assert_eq!(state(&never_started.id).await.state, SessionState::Failed);

    let s = state(&interrupted_stop.id).await;
    assert_eq!(s.state, SessionState::Stopped);
    assert!(s.process.is_none());
    assert!(h.resources.process_state(50_001).is_none(), "stop finished");

    let s = state(&dead.id).await;
    assert_eq!(s.state, SessionState::Failed);
    assert!(s.process.is_none());

    let s = state(&alive.id).await;
    assert_eq!(s.state, SessionState::Paused);
    assert_eq!(s.process, Some(ProcessHandle { pid: 50_003 }));

    assert_eq!(state(&archived.id).await.state, SessionState::Archived);

    for session in controller.list_sessions(&SessionFilter::default()).await {
        assert!(session.is_consistent(), "{} inconsistent", session.id);
    }
}

#[tokio::test]
async fn restored_sessions_remain_controllable() {
    let h = harness().await;
    let alive = persisted(&h, "t-alive", SessionState::Running, Some(50_010));
    h.resources.adopt_process(50_010);
    h.resources
        .adopt_resources(&alive.workspace_path, alive.pane_target.as_deref());
    seed(&h, &[&alive]).await;

    let controller = h.restarted();
    controller.restore().await.expect("restore");

    let stopped = controller.stop_session(&alive.id).await.expect("stop");
    assert_eq!(stopped.state, SessionState::Stopped);
    assert!(h.resources.process_state(50_010).is_none());
}

#[tokio::test]
async fn live_pid_without_its_pane_is_not_adopted() {
    let h = harness().await;
    let orphan = persisted(&h, "t-orphan", SessionState::Running, Some(61_000));
    h.resources.adopt_process(61_000);
    h.resources.adopt_resources(&orphan.workspace_path, None);
    seed(&h, &[&orphan]).await;

    let controller = h.restarted();
    controller.restore().await.expect("restore");

    let s = controller.get_session(&orphan.id).await.expect("get");
    assert_eq!(s.state, SessionState::Failed);
    assert!(s.process.is_none());
    assert!(s.last_error.as_deref().is_some_and(|e| e.contains("pane")));

    let err = controller
        .stop_session(&orphan.id)
        .await
        .expect_err("failed session cannot be stopped");
    assert_eq!(err.kind(), agentbench::errors::ErrorKind::InvalidTransition);
    assert!(
        !h.resources.calls().iter().any(|c| c.starts_with("terminate")),
        "a pid that outlived its pane is never signalled"
    );
    assert_eq!(h.resources.process_state(61_000), Some(ProcState::Running));
}

#[tokio::test]
async fn live_pid_without_its_workspace_is_not_adopted() {
    let h = harness().await;
    let orphan = persisted(&h, "t-no-tree", SessionState::Paused, Some(61_001));
    h.resources.adopt_process(61_001);
    h.resources
        .adopt_resources(&h.dir.path().join("elsewhere"), orphan.pane_target.as_deref());
    seed(&h, &[&orphan]).await;

    let controller = h.restarted();
    controller.restore().await.expect("restore");

    let s = controller.get_session(&orphan.id).await.expect("get");
    assert_eq!(s.state, SessionState::Failed);
    assert!(s.last_error.as_deref().is_some_and(|e| e.contains("workspace")));

    // Archiving releases the pane that is still there.
    controller.archive_session(&orphan.id).await.expect("archive");
    assert_eq!(h.resources.panes(), 0);
}

#[tokio::test]
async fn interrupted_stop_that_cannot_kill_ends_failed() {
    let h = harness().await;
    let stuck = persisted(&h, "t-stuck", SessionState::Stopping, Some(50_020));
    h.resources.adopt_process(50_020);
    h.resources.fail(Op::Terminate);
    seed(&h, &[&stuck]).await;

    let controller = h.restarted();
    controller.restore().await.expect("restore");

    let s = controller.get_session(&stuck.id).await.expect("get");
    assert_eq!(s.state, SessionState::Failed);
    assert!(s.process.is_none());
    assert!(s
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("injected failure")));

    // Failed is not a dead end.
    controller.archive_session(&stuck.id).await.expect("archive");
}

#[tokio::test]
async fn state_survives_restart() {
    let h = harness().await;
    let session = h
        .controller
        .start_session(agentbench::api::StartCodingRequest {
            task_id: "task-1".into(),
            repo_path: Some(h.repo()),
            ..Default::default()
        })
        .await
        .expect("start");
    h.controller.stop_session(&session.id).await.expect("stop");

    let controller = h.restarted();
    controller.restore().await.expect("restore");
    let restored = controller.get_session(&session.id).await.expect("get");
    assert_eq!(restored.state, SessionState::Stopped);
    assert_eq!(restored.workspace_path, session.workspace_path);
    assert_eq!(restored.branch, session.branch);
    assert_eq!(restored.repo_path, session.repo_path);
}
