//! Error types for qrc-client.

use std::time::Duration;

use thiserror::Error;

use crate::engine::ConnectionState;

/// Main error type for all engine operations.
#[derive(Debug, Error)]
pub enum QrcError {
    /// The TCP connection to the core could not be established.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The connection dropped while the session was running.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A send was attempted without an open connection.
    #[error("not connected")]
    Disconnected,

    /// A document on the wire exceeded the configured maximum size.
    #[error("frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// A framed unit was not a valid JSON-RPC envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// No response arrived before the request deadline.
    #[error("request {method} timed out after {timeout:?}")]
    RequestTimeout { method: String, timeout: Duration },

    /// The core answered with a JSON-RPC error object.
    #[error("core returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The core rejected the logon.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The `result` payload did not match the method's schema.
    #[error("unexpected result shape for {method}: {detail}")]
    UnexpectedResultShape { method: String, detail: String },

    /// Parameters failed local validation; nothing was sent.
    #[error("invalid params for {method}: {detail}")]
    InvalidParams { method: String, detail: String },

    /// Every request id below the wrap bound is outstanding.
    #[error("too many pending requests ({0})")]
    TooManyPending(usize),

    /// The method name is not part of the catalogue.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// The engine is not in a state that accepts calls.
    #[error("engine not ready (state: {0})")]
    NotReady(ConnectionState),

    /// `connect` was called on an engine that already has a connection.
    #[error("already connected")]
    AlreadyConnected,

    /// The configuration was rejected by `EngineConfig::validate`.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error on the socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QrcError {
    /// Classify a server-reported error code.
    ///
    /// Returns `None` for every variant other than [`QrcError::Rpc`].
    pub fn rpc_kind(&self) -> Option<RpcErrorKind> {
        match self {
            QrcError::Rpc { code, .. } => Some(RpcErrorKind::from_code(*code)),
            _ => None,
        }
    }
}

/// Error codes a core may return in a response's `error.code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    ServerError,
    /// The core is the standby unit of a redundant pair.
    CoreOnStandby,
    InvalidPageRequestId,
    BadPageRequest,
    MissingFile,
    ChangeGroupsExhausted,
    UnknownChangeGroup,
    UnknownComponent,
    UnknownControl,
    IllegalMixerChannel,
    LogonRequired,
    Other(i64),
}

impl RpcErrorKind {
    pub fn from_code(code: i64) -> Self {
        match code {
            -32700 => RpcErrorKind::ParseError,
            -32600 => RpcErrorKind::InvalidRequest,
            -32601 => RpcErrorKind::MethodNotFound,
            -32602 => RpcErrorKind::InvalidParams,
            -32603 => RpcErrorKind::ServerError,
            -32604 => RpcErrorKind::CoreOnStandby,
            2 => RpcErrorKind::InvalidPageRequestId,
            3 => RpcErrorKind::BadPageRequest,
            4 => RpcErrorKind::MissingFile,
            5 => RpcErrorKind::ChangeGroupsExhausted,
            6 => RpcErrorKind::UnknownChangeGroup,
            7 => RpcErrorKind::UnknownComponent,
            8 => RpcErrorKind::UnknownControl,
            9 => RpcErrorKind::IllegalMixerChannel,
            10 => RpcErrorKind::LogonRequired,
            other => RpcErrorKind::Other(other),
        }
    }

    /// Human readable description of the code.
    pub fn description(&self) -> &'static str {
        match self {
            RpcErrorKind::ParseError => "invalid JSON was received by the core",
            RpcErrorKind::InvalidRequest => "the JSON sent is not a valid request object",
            RpcErrorKind::MethodNotFound => "method not found",
            RpcErrorKind::InvalidParams => "invalid params",
            RpcErrorKind::ServerError => "server error",
            RpcErrorKind::CoreOnStandby => "core is the standby unit in a redundant configuration",
            RpcErrorKind::InvalidPageRequestId => "invalid page request id",
            RpcErrorKind::BadPageRequest => "could not create the requested page request",
            RpcErrorKind::MissingFile => "missing file",
            RpcErrorKind::ChangeGroupsExhausted => "change groups exhausted",
            RpcErrorKind::UnknownChangeGroup => "unknown change group",
            RpcErrorKind::UnknownComponent => "unknown component name",
            RpcErrorKind::UnknownControl => "unknown control",
            RpcErrorKind::IllegalMixerChannel => "illegal mixer channel index",
            RpcErrorKind::LogonRequired => "logon required",
            RpcErrorKind::Other(_) => "unrecognized error code",
        }
    }
}

/// Result type alias using QrcError.
pub type Result<T> = std::result::Result<T, QrcError>;
