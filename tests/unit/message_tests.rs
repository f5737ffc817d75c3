//! Message classification and encoding.

use serde_json::json;

use agentbench::rpc::message::{Message, Response, RequestId, RpcError};
use agentbench::AppError;

#[test]
fn method_with_id_is_request() {
    let message = Message::from_value(json!({
        "jsonrpc": "2.0", "id": 7, "method": "session.stop",
        "params": { "session_id": "s1" }
    }))
    .expect("valid request");

    let Message::Request(request) = message else {
        panic!("expected request");
    };
    assert_eq!(request.id, RequestId::Number(7));
    assert_eq!(request.method, "session.stop");
    assert_eq!(request.params["session_id"], "s1");
}

#[test]
fn method_without_id_is_notification() {
    let message = Message::from_value(json!({ "method": "session.state_changed", "params": {} }))
        .expect("valid notification");
    assert!(matches!(message, Message::Notification(_)));
}

#[test]
fn null_id_is_treated_as_absent() {
    let message = Message::from_value(json!({ "id": null, "method": "x.y" }))
        .expect("valid notification");
    assert!(matches!(message, Message::Notification(_)));
}

#[test]
fn error_response_parses() {
    let message = Message::from_value(json!({
        "jsonrpc": "2.0", "id": "abc",
        "error": { "code": -32001, "message": "no such session",
                   "data": { "kind": "session_not_found", "detail": null } }
    }))
    .expect("valid response");

    let Message::Response(Response { id, outcome }) = message else {
        panic!("expected response");
    };
    assert_eq!(id, RequestId::Text("abc".into()));
    let err = outcome.expect_err("error outcome");
    assert_eq!(
        AppError::from(err),
        AppError::SessionNotFound("no such session".into())
    );
}

#[test]
fn structural_violations_are_rejected() {
    let bad = [
        json!("just a string"),
        json!({ "jsonrpc": "1.0", "id": 1, "method": "x.y" }),
        json!({ "id": 1.5, "method": "x.y" }),
        json!({ "id": 1, "method": 42 }),
        json!({ "id": 1 }),
        json!({ "result": true }),
        json!({ "id": 1, "error": { "message": "missing code" } }),
    ];
    for value in bad {
        let err = Message::from_value(value.clone()).expect_err("must reject");
        assert!(matches!(err, AppError::Transport(_)), "{value}");
    }
}

#[test]
fn encoded_request_carries_version_and_omits_null_params() {
    let message = Message::from_value(json!({ "id": 1, "method": "server.ping" }))
        .expect("valid request");
    let value = message.to_value();
    assert_eq!(value["jsonrpc"], "2.0");
    assert_eq!(value["id"], 1);
    assert!(value.get("params").is_none());
}

#[test]
fn encoded_error_response_has_error_object() {
    let message = Message::Response(Response {
        id: RequestId::Number(9),
        outcome: Err(RpcError::from(&AppError::Timeout("slow".into()))),
    });
    let value = message.to_value();
    assert_eq!(value["error"]["code"], -32_005);
    assert_eq!(value["error"]["data"]["kind"], "timeout");
    assert!(value.get("result").is_none());
}
