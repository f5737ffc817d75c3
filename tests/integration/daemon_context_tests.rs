//! Daemon wiring: services start, serve, and shut down cleanly.

use std::sync::Arc;
use std::time::Duration;

use agentbench::api::{SessionApi, StartCodingRequest};
use agentbench::context::AppContext;
use agentbench::models::session::SessionState;
use agentbench::persistence::db;
use agentbench::resources::ResourceManager;
use agentbench::rpc::client::{ClientOptions, RemoteSessionApi};

use super::test_helpers::{test_config, FakeResources};

fn options() -> ClientOptions {
    ClientOptions {
        call_timeout: Duration::from_secs(5),
        connect_attempts: 2,
        initial_backoff: Duration::from_millis(10),
        connect_timeout: Duration::from_millis(500),
    }
}

#[tokio::test]
async fn services_serve_until_shutdown() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("project")).expect("repo");
    let config = Arc::new(test_config(dir.path()));
    let db = Arc::new(db::connect(&config.db_path()).await.expect("db file"));
    let resources = Arc::new(FakeResources::default());

    let ctx = AppContext::with_parts(
        Arc::clone(&config),
        db,
        Arc::clone(&resources) as Arc<dyn ResourceManager>,
    )
    .await
    .expect("context");
    let handles = ctx.start_services().expect("services start");

    let api = RemoteSessionApi::connect(&config.socket_path, options())
        .await
        .expect("connect");
    let session = api
        .start_coding(StartCodingRequest {
            task_id: "daemon-task".into(),
            repo_path: Some(dir.path().join("project")),
            ..StartCodingRequest::default()
        })
        .await
        .expect("start");
    assert_eq!(session.state, SessionState::Running);

    ctx.shutdown(handles).await;
    assert!(!config.socket_path.exists(), "socket removed");
    // Sessions outlive the daemon.
    assert_eq!(resources.live_processes(), 1);
}

#[tokio::test]
async fn restart_on_same_store_restores_sessions() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("project")).expect("repo");
    let config = Arc::new(test_config(dir.path()));
    let resources = Arc::new(FakeResources::default());

    let first = AppContext::with_parts(
        Arc::clone(&config),
        Arc::new(db::connect(&config.db_path()).await.expect("db")),
        Arc::clone(&resources) as Arc<dyn ResourceManager>,
    )
    .await
    .expect("first context");
    let session = first
        .controller
        .start_session(StartCodingRequest {
            task_id: "daemon-task".into(),
            repo_path: Some(dir.path().join("project")),
            ..StartCodingRequest::default()
        })
        .await
        .expect("start");
    first.shutdown(Vec::new()).await;

    let second = AppContext::with_parts(
        Arc::clone(&config),
        Arc::new(db::connect(&config.db_path()).await.expect("db reopen")),
        Arc::clone(&resources) as Arc<dyn ResourceManager>,
    )
    .await
    .expect("second context");
    let restored = second
        .controller
        .get_session(&session.id)
        .await
        .expect("restored");
    assert_eq!(restored.state, SessionState::Running);
    assert_eq!(restored.process, session.process);
    second.shutdown(Vec::new()).await;
}
