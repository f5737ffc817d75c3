//! Full lifecycle through the controller against fake resources.

use agentbench::api::{SessionFilter, StartCodingRequest};
use agentbench::errors::ErrorKind;
use agentbench::models::session::SessionState;
use agentbench::orchestrator::controller::RUN_OUTPUT_LIMIT;
use agentbench::AppError;

use super::test_helpers::{harness, harness_with, Harness, ProcState};

fn start_request(h: &Harness, task: &str) -> StartCodingRequest {
    StartCodingRequest {
        task_id: task.into(),
        agent: None,
        repo_path: Some(h.repo()),
        base_ref: None,
        prompt: Some("fix the flaky test".into()),
        model: Some("opus".into()),
    }
}

#[tokio::test]
async fn start_creates_workspace_pane_and_process() {
    let h = harness().await;
    let session = h
        .controller
        .start_session(start_request(&h, "task-1"))
        .await
        .expect("start succeeds");

    assert_eq!(session.state, SessionState::Running);
    assert_eq!(session.task_id, "task-1");
    assert_eq!(session.agent, "claude_code");
    assert!(session.is_consistent());
    assert!(session.branch.starts_with("session/claude_code-"));
    assert!(h.resources.has_workspace(&session.workspace_path));
    assert_eq!(h.resources.panes(), 1);

    let pid = session.process.expect("process recorded").pid;
    assert_eq!(h.resources.process_state(pid), Some(ProcState::Running));

    let launch = h.resources.launches().pop().expect("one launch");
    assert_eq!(launch.program, "claude");
    assert_eq!(launch.cwd, session.workspace_path);
    assert_eq!(launch.pane_target, session.pane_target);
    assert!(launch.args.contains(&"fix the flaky test".to_owned()));
    assert_eq!(
        launch.env.get("AGENTBENCH_SESSION_ID"),
        Some(&session.id)
    );
}

#[tokio::test]
async fn pause_resume_stop_archive() {
    let h = harness().await;
    let session = h
        .controller
        .start_session(start_request(&h, "task-1"))
        .await
        .expect("start");
    let pid = session.process.expect("pid").pid;

    let paused = h.controller.pause_session(&session.id).await.expect("pause");
    assert_eq!(paused.state, SessionState::Paused);
    assert_eq!(h.resources.process_state(pid), Some(ProcState::Suspended));

    let resumed = h.controller.resume_session(&session.id).await.expect("resume");
    assert_eq!(resumed.state, SessionState::Running);
    assert_eq!(h.resources.process_state(pid), Some(ProcState::Running));

    let stopped = h.controller.stop_session(&session.id).await.expect("stop");
    assert_eq!(stopped.state, SessionState::Stopped);
    assert!(stopped.process.is_none());
    assert_eq!(h.resources.live_processes(), 0);
    // Stop keeps the workspace and pane for inspection.
    assert!(h.resources.has_workspace(&session.workspace_path));
    assert_eq!(h.resources.panes(), 1);

    let archived = h.controller.archive_session(&session.id).await.expect("archive");
    assert_eq!(archived.state, SessionState::Archived);
    assert_eq!(h.resources.workspaces(), 0);
    assert_eq!(h.resources.panes(), 0);

    let fetched = h.controller.get_session(&session.id).await.expect("get");
    assert_eq!(fetched, archived);
}

#[tokio::test]
async fn repeated_requests_are_no_ops() {
    let h = harness().await;
    let session = h
        .controller
        .start_session(start_request(&h, "task-1"))
        .await
        .expect("start");

    h.controller.pause_session(&session.id).await.expect("pause");
    let again = h.controller.pause_session(&session.id).await.expect("pause twice");
    assert_eq!(again.state, SessionState::Paused);

    h.controller.resume_session(&session.id).await.expect("resume");
    let again = h.controller.resume_session(&session.id).await.expect("resume twice");
    assert_eq!(again.state, SessionState::Running);

    h.controller.stop_session(&session.id).await.expect("stop");
    let again = h.controller.stop_session(&session.id).await.expect("stop twice");
    assert_eq!(again.state, SessionState::Stopped);

    h.controller.archive_session(&session.id).await.expect("archive");
    let again = h
        .controller
        .archive_session(&session.id)
        .await
        .expect("archive twice");
    assert_eq!(again.state, SessionState::Archived);

    let terminates = h
        .resources
        .calls()
        .iter()
        .filter(|c| c.starts_with("terminate"))
        .count();
    assert_eq!(terminates, 1, "second stop must not signal again");
}

#[tokio::test]
async fn illegal_requests_are_invalid_transitions() {
    let h = harness().await;
    let session = h
        .controller
        .start_session(start_request(&h, "task-1"))
        .await
        .expect("start");

    let err = h
        .controller
        .archive_session(&session.id)
        .await
        .expect_err("cannot archive a running session");
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    h.controller.stop_session(&session.id).await.expect("stop");
    for result in [
        h.controller.pause_session(&session.id).await,
        h.controller.resume_session(&session.id).await,
    ] {
        let err = result.expect_err("stopped sessions cannot pause or resume");
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    h.controller.archive_session(&session.id).await.expect("archive");
    let err = h
        .controller
        .stop_session(&session.id)
        .await
        .expect_err("archived is terminal");
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    let err = h
        .controller
        .session_output(&session.id, 10)
        .await
        .expect_err("no output once archived");
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let h = harness().await;
    for result in [
        h.controller.stop_session("ghost").await,
        h.controller.pause_session("ghost").await,
        h.controller.get_session("ghost").await,
    ] {
        assert!(matches!(result, Err(AppError::SessionNotFound(ref id)) if id == "ghost"));
    }
}

#[tokio::test]
async fn start_validates_request() {
    let h = harness().await;

    let mut blank = start_request(&h, "   ");
    let err = h.controller.start_session(blank.clone()).await.expect_err("blank task");
    assert_eq!(err.kind(), ErrorKind::InvalidParams);

    blank.task_id = "task-1".into();
    blank.agent = Some("no-such-agent".into());
    let err = h.controller.start_session(blank).await.expect_err("unknown agent");
    assert_eq!(err.kind(), ErrorKind::InvalidParams);

    let mut missing_repo = start_request(&h, "task-1");
    missing_repo.repo_path = Some(h.dir.path().join("does-not-exist"));
    let err = h
        .controller
        .start_session(missing_repo)
        .await
        .expect_err("missing repo");
    assert_eq!(err.kind(), ErrorKind::InvalidParams);

    assert!(h.resources.calls().is_empty(), "nothing touched on rejection");
    assert!(h
        .controller
        .list_sessions(&SessionFilter::default())
        .await
        .is_empty());
}

#[tokio::test]
async fn capacity_limit_is_resource_busy() {
    let h = harness_with(|config| config.max_concurrent_sessions = 2).await;
    let first = h
        .controller
        .start_session(start_request(&h, "task-1"))
        .await
        .expect("first");
    h.controller
        .start_session(start_request(&h, "task-2"))
        .await
        .expect("second");

    let err = h
        .controller
        .start_session(start_request(&h, "task-3"))
        .await
        .expect_err("over capacity");
    assert_eq!(err.kind(), ErrorKind::ResourceBusy);

    // A stopped session frees its slot.
    h.controller.stop_session(&first.id).await.expect("stop");
    h.controller
        .start_session(start_request(&h, "task-3"))
        .await
        .expect("slot freed");
}

#[tokio::test]
async fn list_filters_and_orders_by_creation() {
    let h = harness().await;
    let a = h
        .controller
        .start_session(start_request(&h, "task-a"))
        .await
        .expect("a");
    let b = h
        .controller
        .start_session(start_request(&h, "task-a"))
        .await
        .expect("b");
    let c = h
        .controller
        .start_session(start_request(&h, "task-c"))
        .await
        .expect("c");
    h.controller.stop_session(&b.id).await.expect("stop b");

    let all = h.controller.list_sessions(&SessionFilter::default()).await;
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));

    let task_a = h
        .controller
        .list_sessions(&SessionFilter {
            task_id: Some("task-a".into()),
            states: None,
        })
        .await;
    assert_eq!(task_a.len(), 2);
    assert_ne!(task_a[0].workspace_path, task_a[1].workspace_path);
    assert_ne!(task_a[0].branch, task_a[1].branch);

    let running = h
        .controller
        .list_sessions(&SessionFilter {
            task_id: None,
            states: Some(vec![SessionState::Running]),
        })
        .await;
    let running_ids: Vec<_> = running.iter().map(|s| s.id.clone()).collect();
    assert_eq!(running_ids.len(), 2);
    assert!(running_ids.contains(&a.id));
    assert!(running_ids.contains(&c.id));
}

#[tokio::test]
async fn output_send_and_diff_reach_resources() {
    let h = harness().await;
    let session = h
        .controller
        .start_session(start_request(&h, "task-1"))
        .await
        .expect("start");
    let target = session.pane_target.clone().expect("pane");

    let output = h
        .controller
        .session_output(&session.id, 20)
        .await
        .expect("output");
    assert!(output.contains(&target));

    h.controller
        .send_to_session(&session.id, "run the tests")
        .await
        .expect("send");
    assert!(h
        .resources
        .calls()
        .contains(&format!("send_keys {target} run the tests")));

    let err = h
        .controller
        .send_to_session(&session.id, "")
        .await
        .expect_err("empty text");
    assert_eq!(err.kind(), ErrorKind::InvalidParams);

    let diff = h.controller.session_diff(&session.id).await.expect("diff");
    assert!(diff.starts_with("diff --git"));

    h.controller.stop_session(&session.id).await.expect("stop");
    let err = h
        .controller
        .send_to_session(&session.id, "hello")
        .await
        .expect_err("stopped session takes no input");
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
}

#[tokio::test]
async fn transitions_are_broadcast_in_order() {
    let h = harness().await;
    let mut events = h.controller.subscribe();
    let session = h
        .controller
        .start_session(start_request(&h, "task-1"))
        .await
        .expect("start");
    h.controller.stop_session(&session.id).await.expect("stop");

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.change.session_id, session.id);
        assert!(event.origin.is_none(), "no request scope outside the server");
        seen.push((event.change.previous, event.change.state));
    }
    assert_eq!(
        seen,
        vec![
            (SessionState::Created, SessionState::Starting),
            (SessionState::Starting, SessionState::Running),
            (SessionState::Running, SessionState::Stopping),
            (SessionState::Stopping, SessionState::Stopped),
        ]
    );
}

#[tokio::test]
async fn status_counts_sessions_by_state() {
    let h = harness().await;
    let session = h
        .controller
        .start_session(start_request(&h, "task-1"))
        .await
        .expect("start");
    h.controller
        .start_session(start_request(&h, "task-2"))
        .await
        .expect("start");
    h.controller.stop_session(&session.id).await.expect("stop");

    let status = h.controller.server_status().await;
    assert_eq!(status.status, "running");
    assert_eq!(status.pid, std::process::id());
    assert_eq!(status.sessions.get("running"), Some(&1));
    assert_eq!(status.sessions.get("stopped"), Some(&1));
}

#[tokio::test]
async fn worktree_command_is_split_and_bounded() {
    let h = harness().await;
    let session = h
        .controller
        .start_session(start_request(&h, "task-run"))
        .await
        .expect("start");

    let output = h
        .controller
        .run_in_worktree(&session.id, "cargo test -- 'name with spaces'")
        .await
        .expect("run");
    assert_eq!(output, "ran cargo test -- name with spaces\n");
    assert!(h.resources.calls().contains(&format!(
        "run {} cargo|test|--|name with spaces|60s",
        session.workspace_path.display()
    )));

    h.resources.set_run_output("é".repeat(RUN_OUTPUT_LIMIT + 50));
    let output = h
        .controller
        .run_in_worktree(&session.id, "cat big.log")
        .await
        .expect("run");
    assert_eq!(output.chars().count(), RUN_OUTPUT_LIMIT);

    // Still usable once the agent is stopped.
    h.controller.stop_session(&session.id).await.expect("stop");
    h.controller
        .run_in_worktree(&session.id, "git status")
        .await
        .expect("run after stop");
}

#[tokio::test]
async fn worktree_command_rejections() {
    let h = harness().await;
    let session = h
        .controller
        .start_session(start_request(&h, "task-run"))
        .await
        .expect("start");

    let err = h
        .controller
        .run_in_worktree(&session.id, "echo 'unterminated")
        .await
        .expect_err("bad quoting");
    assert_eq!(err.kind(), ErrorKind::InvalidParams);

    let err = h
        .controller
        .run_in_worktree(&session.id, "   ")
        .await
        .expect_err("empty command");
    assert_eq!(err.kind(), ErrorKind::InvalidParams);

    let err = h
        .controller
        .run_in_worktree("ghost", "ls")
        .await
        .expect_err("unknown session");
    assert_eq!(err.kind(), ErrorKind::SessionNotFound);

    h.controller.stop_session(&session.id).await.expect("stop");
    h.controller.archive_session(&session.id).await.expect("archive");
    let err = h
        .controller
        .run_in_worktree(&session.id, "ls")
        .await
        .expect_err("archived session has no worktree");
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    assert!(!h.resources.calls().iter().any(|c| c.starts_with("run ")));
}
