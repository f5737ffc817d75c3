//! Error types shared across the application.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Socket setup failure or malformed frame on the control channel.
    Transport(String),
    /// The peer connection closed while a call was outstanding.
    TransportClosed(String),
    /// Structurally invalid protocol message (not a framing problem).
    InvalidRequest(String),
    /// No handler is registered for the requested method.
    MethodNotFound(String),
    /// Request parameters failed to deserialize or validate.
    InvalidParams(String),
    /// Requested session does not exist.
    SessionNotFound(String),
    /// Lifecycle operation not permitted from the session's current state.
    InvalidTransition(String),
    /// Capacity or in-flight conflict prevents the operation right now.
    ResourceBusy(String),
    /// A workspace, pane or process operation failed.
    Resource(String),
    /// An external command or remote call exceeded its deadline.
    Timeout(String),
    /// Unexpected failure inside the daemon.
    Internal(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::TransportClosed(msg) => write!(f, "transport closed: {msg}"),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            Self::MethodNotFound(msg) => write!(f, "method not found: {msg}"),
            Self::InvalidParams(msg) => write!(f, "invalid params: {msg}"),
            Self::SessionNotFound(msg) => write!(f, "session not found: {msg}"),
            Self::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            Self::ResourceBusy(msg) => write!(f, "resource busy: {msg}"),
            Self::Resource(msg) => write!(f, "resource failure: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Internal(msg) => write!(f, "internal: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("json: {err}"))
    }
}

/// Wire-level error category carried in the `data.kind` field of a
/// JSON-RPC error object.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Frame was not valid JSON.
    ParseError,
    /// Message was JSON but not a valid request.
    InvalidRequest,
    /// Unknown method name.
    MethodNotFound,
    /// Parameters did not match the method's schema.
    InvalidParams,
    /// Unexpected server-side failure.
    Internal,
    /// Session id is unknown.
    SessionNotFound,
    /// Lifecycle guard rejected the operation.
    InvalidTransition,
    /// Capacity limit or conflicting in-flight request.
    ResourceBusy,
    /// Workspace, pane or process operation failed.
    ResourceFailure,
    /// Deadline exceeded.
    Timeout,
    /// Connection lost.
    TransportClosed,
}

impl ErrorKind {
    /// Numeric JSON-RPC error code for this kind.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::ParseError => -32_700,
            Self::InvalidRequest => -32_600,
            Self::MethodNotFound => -32_601,
            Self::InvalidParams => -32_602,
            Self::Internal => -32_603,
            Self::SessionNotFound => -32_001,
            Self::InvalidTransition => -32_002,
            Self::ResourceBusy => -32_003,
            Self::ResourceFailure => -32_004,
            Self::Timeout => -32_005,
            Self::TransportClosed => -32_006,
        }
    }

    /// Recover a kind from a numeric code. Unknown codes map to `Internal`.
    #[must_use]
    pub fn from_code(code: i64) -> Self {
        match code {
            -32_700 => Self::ParseError,
            -32_600 => Self::InvalidRequest,
            -32_601 => Self::MethodNotFound,
            -32_602 => Self::InvalidParams,
            -32_001 => Self::SessionNotFound,
            -32_002 => Self::InvalidTransition,
            -32_003 => Self::ResourceBusy,
            -32_004 => Self::ResourceFailure,
            -32_005 => Self::Timeout,
            -32_006 => Self::TransportClosed,
            _ => Self::Internal,
        }
    }
}

impl AppError {
    /// Wire category for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::ParseError,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::MethodNotFound(_) => ErrorKind::MethodNotFound,
            Self::InvalidParams(_) | Self::Config(_) => ErrorKind::InvalidParams,
            Self::SessionNotFound(_) => ErrorKind::SessionNotFound,
            Self::InvalidTransition(_) => ErrorKind::InvalidTransition,
            Self::ResourceBusy(_) => ErrorKind::ResourceBusy,
            Self::Resource(_) | Self::Io(_) => ErrorKind::ResourceFailure,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::TransportClosed(_) => ErrorKind::TransportClosed,
            Self::Db(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message text without the display prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Config(msg)
            | Self::Db(msg)
            | Self::Io(msg)
            | Self::Transport(msg)
            | Self::TransportClosed(msg)
            | Self::InvalidRequest(msg)
            | Self::MethodNotFound(msg)
            | Self::InvalidParams(msg)
            | Self::SessionNotFound(msg)
            | Self::InvalidTransition(msg)
            | Self::ResourceBusy(msg)
            | Self::Resource(msg)
            | Self::Timeout(msg)
            | Self::Internal(msg) => msg,
        }
    }

    /// Rebuild an error from its wire category and message.
    #[must_use]
    pub fn from_kind(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::ParseError => Self::Transport(message),
            ErrorKind::InvalidRequest => Self::InvalidRequest(message),
            ErrorKind::MethodNotFound => Self::MethodNotFound(message),
            ErrorKind::InvalidParams => Self::InvalidParams(message),
            ErrorKind::Internal => Self::Internal(message),
            ErrorKind::SessionNotFound => Self::SessionNotFound(message),
            ErrorKind::InvalidTransition => Self::InvalidTransition(message),
            ErrorKind::ResourceBusy => Self::ResourceBusy(message),
            ErrorKind::ResourceFailure => Self::Resource(message),
            ErrorKind::Timeout => Self::Timeout(message),
            ErrorKind::TransportClosed => Self::TransportClosed(message),
        }
    }
}
