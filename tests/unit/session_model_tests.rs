//! Session state machine and identity derivation.

use std::path::PathBuf;

use agentbench::models::session::{NewSession, ProcessHandle, Session, SessionState};

fn new_spec(prefix: Option<&str>) -> NewSession {
    NewSession {
        task_id: "task-7".into(),
        agent: "claude_code".into(),
        repo_path: PathBuf::from("/src/project"),
        base_ref: "HEAD".into(),
        worktree_parent: PathBuf::from("/src/project-worktrees"),
        pane_prefix: prefix.map(str::to_owned),
        prompt: Some("do it".into()),
        model: None,
    }
}

// ── Transition table ────────────────────────────────────────────────────────

#[test]
fn allowed_edges() {
    use SessionState::{Archived, Created, Failed, Paused, Running, Starting, Stopped, Stopping};

    let allowed = [
        (Created, Starting),
        (Starting, Running),
        (Starting, Stopping),
        (Starting, Failed),
        (Running, Paused),
        (Running, Stopping),
        (Running, Failed),
        (Paused, Running),
        (Paused, Stopping),
        (Paused, Failed),
        (Stopping, Stopped),
        (Stopping, Failed),
        (Stopped, Archived),
        (Failed, Archived),
    ];

    for from in SessionState::ALL {
        for to in SessionState::ALL {
            let expected = allowed.contains(&(from, to));
            assert_eq!(
                from.can_transition_to(to),
                expected,
                "{from} -> {to} should be {}",
                if expected { "allowed" } else { "rejected" }
            );
        }
    }
}

#[test]
fn archived_is_terminal() {
    for next in SessionState::ALL {
        assert!(!SessionState::Archived.can_transition_to(next));
    }
}

#[test]
fn stopped_cannot_restart() {
    assert!(!SessionState::Stopped.can_transition_to(SessionState::Running));
    assert!(!SessionState::Stopped.can_transition_to(SessionState::Starting));
}

#[test]
fn process_states() {
    let with_process: Vec<_> = SessionState::ALL
        .into_iter()
        .filter(|s| s.requires_process())
        .collect();
    assert_eq!(
        with_process,
        vec![
            SessionState::Running,
            SessionState::Paused,
            SessionState::Stopping
        ]
    );
}

#[test]
fn state_names_round_trip_through_parse() {
    for state in SessionState::ALL {
        assert_eq!(SessionState::parse(state.as_str()), Some(state));
        let json = serde_json::to_value(state).expect("serialize state");
        assert_eq!(json, state.as_str());
    }
    assert_eq!(SessionState::parse("zombie"), None);
}

// ── Identity ────────────────────────────────────────────────────────────────

#[test]
fn new_session_derives_names_from_short_id() {
    let session = Session::new(new_spec(Some("ab")), false);
    let short = session.short_id().to_owned();

    assert_eq!(session.state, SessionState::Created);
    assert_eq!(short.len(), 8);
    assert_eq!(
        session.workspace_path,
        PathBuf::from("/src/project-worktrees").join(&short)
    );
    assert_eq!(session.branch, format!("session/claude_code-{short}"));
    assert_eq!(
        session.pane_target.as_deref(),
        Some(format!("ab-{short}:claude_code").as_str())
    );
    assert_eq!(session.pane_session(), Some(format!("ab-{short}").as_str()));
    assert!(session.process.is_none());
    assert_eq!(session.created_at, session.updated_at);
}

#[test]
fn long_names_use_full_id() {
    let session = Session::new(new_spec(None), true);
    assert_eq!(
        session.workspace_path,
        PathBuf::from("/src/project-worktrees").join(&session.id)
    );
    assert!(session.branch.ends_with(&session.id));
    assert!(session.pane_target.is_none());
}

#[test]
fn ids_are_unique() {
    let a = Session::new(new_spec(None), false);
    let b = Session::new(new_spec(None), false);
    assert_ne!(a.id, b.id);
    assert_ne!(a.workspace_path, b.workspace_path);
}

#[test]
fn consistency_tracks_process_handle() {
    let mut session = Session::new(new_spec(None), false);
    assert!(session.is_consistent());

    session.state = SessionState::Running;
    assert!(!session.is_consistent());

    session.process = Some(ProcessHandle { pid: 4242 });
    assert!(session.is_consistent());

    session.state = SessionState::Stopped;
    assert!(!session.is_consistent());
}
