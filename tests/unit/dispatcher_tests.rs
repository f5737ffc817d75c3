//! Method registry: registration rules, param decoding and error mapping.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use agentbench::api::{
    ApiFuture, LivenessReport, ServerStatus, SessionApi, SessionFilter, StartCodingRequest,
};
use agentbench::errors::ErrorKind;
use agentbench::models::session::Session;
use agentbench::rpc::dispatcher::{DispatchContext, MethodRegistry};
use agentbench::rpc::message::{Request, RequestId};
use agentbench::rpc::methods::register_all;
use agentbench::{AppError, Result};

/// Backend that only answers `ping` and reports every session as missing.
struct NullApi;

fn missing<T>(id: &str) -> Result<T> {
    Err(AppError::SessionNotFound(id.to_owned()))
}

impl SessionApi for NullApi {
    fn start_coding(&self, request: StartCodingRequest) -> ApiFuture<'_, Session> {
        Box::pin(async move { Err(AppError::InvalidParams(request.task_id)) })
    }
    fn stop(&self, session_id: String) -> ApiFuture<'_, Session> {
        Box::pin(async move { missing(&session_id) })
    }
    fn pause(&self, session_id: String) -> ApiFuture<'_, Session> {
        Box::pin(async move { missing(&session_id) })
    }
    fn resume(&self, session_id: String) -> ApiFuture<'_, Session> {
        Box::pin(async move { missing(&session_id) })
    }
    fn archive(&self, session_id: String) -> ApiFuture<'_, Session> {
        Box::pin(async move { missing(&session_id) })
    }
    fn get(&self, session_id: String) -> ApiFuture<'_, Session> {
        Box::pin(async move { missing(&session_id) })
    }
    fn list(&self, _filter: SessionFilter) -> ApiFuture<'_, Vec<Session>> {
        Box::pin(async { Ok(Vec::new()) })
    }
    fn check_liveness(&self, session_id: String) -> ApiFuture<'_, LivenessReport> {
        Box::pin(async move { missing(&session_id) })
    }
    fn get_output(&self, session_id: String, _lines: u32) -> ApiFuture<'_, String> {
        Box::pin(async move { missing(&session_id) })
    }
    fn send_to(&self, session_id: String, _text: String) -> ApiFuture<'_, ()> {
        Box::pin(async move { missing(&session_id) })
    }
    fn get_diff(&self, session_id: String) -> ApiFuture<'_, String> {
        Box::pin(async move { missing(&session_id) })
    }
    fn run_in_worktree(&self, session_id: String, _command: String) -> ApiFuture<'_, String> {
        Box::pin(async move { missing(&session_id) })
    }
    fn ping(&self) -> ApiFuture<'_, String> {
        Box::pin(async { Ok("pong".to_owned()) })
    }
    fn status(&self) -> ApiFuture<'_, ServerStatus> {
        Box::pin(async { Err(AppError::Internal("unused".into())) })
    }
}

fn context() -> Arc<DispatchContext> {
    Arc::new(DispatchContext {
        api: Arc::new(NullApi),
        connections: Arc::new(AtomicUsize::new(0)),
    })
}

fn request(method: &str, params: Value) -> Request {
    Request {
        id: RequestId::Number(1),
        method: method.into(),
        params,
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EchoParams {
    word: String,
}

// ── Registration ────────────────────────────────────────────────────────────

#[test]
fn duplicate_method_rejected() {
    let mut registry = MethodRegistry::new();
    registry
        .register("test.echo", |_ctx: Arc<DispatchContext>, p: EchoParams| async move {
            Ok(p.word)
        })
        .expect("first registration");
    let err = registry
        .register("test.echo", |_ctx: Arc<DispatchContext>, p: EchoParams| async move {
            Ok(p.word)
        })
        .expect_err("second registration rejected");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn malformed_names_rejected() {
    for name in ["", "echo", "test.", ".echo", "Test.Echo", "test..echo", "test.echo-x"] {
        let mut registry = MethodRegistry::new();
        let result = registry.register(name, |_ctx: Arc<DispatchContext>, p: EchoParams| async move {
            Ok(p.word)
        });
        assert!(result.is_err(), "{name:?} should be rejected");
    }
}

#[test]
fn daemon_table_lists_every_method() {
    let registry = register_all().expect("registry builds");
    assert_eq!(
        registry.methods(),
        vec![
            "server.ping",
            "server.status",
            "session.archive",
            "session.check_liveness",
            "session.get",
            "session.get_diff",
            "session.get_output",
            "session.list",
            "session.pause",
            "session.resume",
            "session.run_in_worktree",
            "session.send_to",
            "session.start_coding",
            "session.stop",
        ]
    );
}

// ── Dispatch ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn handler_result_becomes_response() {
    let mut registry = MethodRegistry::new();
    registry
        .register("test.echo", |_ctx: Arc<DispatchContext>, p: EchoParams| async move {
            Ok(p.word.to_uppercase())
        })
        .expect("register");

    let response = registry
        .dispatch(context(), request("test.echo", json!({ "word": "hi" })))
        .await;
    assert_eq!(response.id, RequestId::Number(1));
    assert_eq!(response.outcome.expect("ok"), json!("HI"));
}

#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let registry = register_all().expect("registry builds");
    let response = registry
        .dispatch(context(), request("session.teleport", json!({})))
        .await;
    let err = response.outcome.expect_err("unknown method");
    assert_eq!(err.code, ErrorKind::MethodNotFound.code());
}

#[tokio::test]
async fn bad_params_are_invalid_params() {
    let registry = register_all().expect("registry builds");

    for params in [
        json!({}),
        json!({ "session_id": 5 }),
        json!({ "session_id": "a", "extra": true }),
        json!([1, 2]),
    ] {
        let response = registry
            .dispatch(context(), request("session.get", params.clone()))
            .await;
        let err = response.outcome.expect_err("bad params rejected");
        assert_eq!(err.code, ErrorKind::InvalidParams.code(), "{params}");
    }
}

#[tokio::test]
async fn omitted_params_decode_as_empty_object() {
    let registry = register_all().expect("registry builds");

    let ping = registry
        .dispatch(context(), request("server.ping", Value::Null))
        .await;
    assert_eq!(ping.outcome.expect("ping ok"), json!("pong"));

    let list = registry
        .dispatch(context(), request("session.list", Value::Null))
        .await;
    assert_eq!(list.outcome.expect("list ok"), json!([]));
}

#[tokio::test]
async fn backend_errors_keep_their_kind() {
    let registry = register_all().expect("registry builds");
    let response = registry
        .dispatch(context(), request("session.stop", json!({ "session_id": "ghost" })))
        .await;
    let err = response.outcome.expect_err("missing session");
    assert_eq!(err.code, ErrorKind::SessionNotFound.code());
    assert_eq!(err.message, "ghost");
}
