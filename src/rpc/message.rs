//! JSON-RPC 2.0 message shapes.
//!
//! A frame is classified by which fields it carries: `method` + `id` is a
//! request, `method` alone a notification, `id` + `result`/`error` a
//! response. Anything else is structurally malformed.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::ErrorKind;
use crate::{AppError, Result};

/// Protocol version tag carried on every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Caller-assigned correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id.
    Number(i64),
    /// String id.
    Text(String),
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Wire error object: `{code, message, data: {kind, detail}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric JSON-RPC code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// `{"kind": …, "detail": …}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Error category, from `data.kind` when present, else from `code`.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.data
            .as_ref()
            .and_then(|data| data.get("kind"))
            .and_then(|kind| serde_json::from_value(kind.clone()).ok())
            .unwrap_or_else(|| ErrorKind::from_code(self.code))
    }
}

impl From<&AppError> for RpcError {
    fn from(err: &AppError) -> Self {
        let kind = err.kind();
        Self {
            code: kind.code(),
            message: err.message().to_owned(),
            data: Some(json!({ "kind": kind, "detail": Value::Null })),
        }
    }
}

impl From<RpcError> for AppError {
    fn from(err: RpcError) -> Self {
        AppError::from_kind(err.kind(), err.message)
    }
}

/// Client-to-server call.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation id.
    pub id: RequestId,
    /// Dot-namespaced method name.
    pub method: String,
    /// Parameter payload; `Null` when omitted.
    pub params: Value,
}

/// Server reply to one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Echo of the request id.
    pub id: RequestId,
    /// `result` or `error`.
    pub outcome: std::result::Result<Value, RpcError>,
}

/// Unsolicited server-to-client event.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Event name.
    pub method: String,
    /// Event payload.
    pub params: Value,
}

/// Any protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Call expecting a response.
    Request(Request),
    /// Reply to a call.
    Response(Response),
    /// One-way event.
    Notification(Notification),
}

impl Message {
    /// Classify a decoded JSON value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the value is not a well-formed
    /// request, response or notification.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut object) = value else {
            return Err(malformed("message is not a JSON object"));
        };

        if let Some(version) = object.get("jsonrpc") {
            if version.as_str() != Some(JSONRPC_VERSION) {
                return Err(malformed("unsupported jsonrpc version"));
            }
        }

        let id = match object.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value::<RequestId>(raw)
                    .map_err(|_| malformed("id must be an integer or string"))?,
            ),
        };

        if let Some(method) = object.remove("method") {
            let Value::String(method) = method else {
                return Err(malformed("method must be a string"));
            };
            let params = object.remove("params").unwrap_or(Value::Null);
            return Ok(match id {
                Some(id) => Self::Request(Request { id, method, params }),
                None => Self::Notification(Notification { method, params }),
            });
        }

        let id = id.ok_or_else(|| malformed("message has neither method nor id"))?;
        if let Some(error) = object.remove("error") {
            let error: RpcError = serde_json::from_value(error)
                .map_err(|err| malformed(&format!("invalid error object: {err}")))?;
            return Ok(Self::Response(Response {
                id,
                outcome: Err(error),
            }));
        }
        match object.remove("result") {
            Some(result) => Ok(Self::Response(Response {
                id,
                outcome: Ok(result),
            })),
            None => Err(malformed("response has neither result nor error")),
        }
    }

    /// Encode as a JSON value with the `jsonrpc` tag.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
        match self {
            Self::Request(request) => {
                object.insert("id".into(), id_value(&request.id));
                object.insert("method".into(), Value::from(request.method.as_str()));
                if !request.params.is_null() {
                    object.insert("params".into(), request.params.clone());
                }
            }
            Self::Response(response) => {
                object.insert("id".into(), id_value(&response.id));
                match &response.outcome {
                    Ok(result) => {
                        object.insert("result".into(), result.clone());
                    }
                    Err(error) => {
                        object.insert("error".into(), json!(error));
                    }
                }
            }
            Self::Notification(notification) => {
                object.insert("method".into(), Value::from(notification.method.as_str()));
                if !notification.params.is_null() {
                    object.insert("params".into(), notification.params.clone());
                }
            }
        }
        Value::Object(object)
    }
}

fn id_value(id: &RequestId) -> Value {
    match id {
        RequestId::Number(n) => Value::from(*n),
        RequestId::Text(s) => Value::from(s.as_str()),
    }
}

fn malformed(reason: &str) -> AppError {
    AppError::Transport(format!("malformed frame: {reason}"))
}
