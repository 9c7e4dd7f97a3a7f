//! Error taxonomy: the JSON-RPC error object, the three reserved codes, and
//! the Rust-level error enums for the transport and client boundaries.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::message::ResponseError;

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach `data`, replacing any previous value.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Returns `true` if this error carries the given reserved code.
    pub fn is(&self, reserved: &ReservedError) -> bool {
        self.code == reserved.code
    }

    /// Lenient decode of an inbound `error` member.
    ///
    /// Missing `code` becomes 0 and missing `message` becomes empty. A value
    /// that is not an object is kept as `data`.
    pub fn from_value(raw: &Value) -> Self {
        match raw {
            Value::Object(map) => Self {
                code: map.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                data: map.get("data").cloned(),
            },
            other => Self {
                code: 0,
                message: String::new(),
                data: Some(other.clone()),
            },
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// One of the reserved client-side error codes.
///
/// These are immutable constants. Every use builds a fresh [`RpcError`], so
/// attaching `data` never touches shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedError {
    pub code: i64,
    pub message: &'static str,
}

impl ReservedError {
    pub fn to_error(&self) -> RpcError {
        RpcError::new(self.code, self.message)
    }

    pub fn with_data(&self, data: Value) -> RpcError {
        self.to_error().with_data(data)
    }
}

/// Success sentinel returned by `send_event`.
pub const NO_ERROR: ReservedError = ReservedError {
    code: -32000,
    message: "No error",
};

/// A request saw no reply before its deadline.
pub const TIMEOUT_EXCEEDED: ReservedError = ReservedError {
    code: -32001,
    message: "Timeout exceeded",
};

/// The transport is not connected.
pub const INVALID_STATE_ERR: ReservedError = ReservedError {
    code: -32002,
    message: "Invalid state",
};

/// Errors raised by a transport channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Opening the connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Operation requires an open connection.
    #[error("transport not connected")]
    NotConnected,

    /// The channel's writer has shut down.
    #[error("transport closed")]
    Closed,

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid configuration, detected at construction.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport failure, passed through unchanged.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A request was rejected: the peer answered with an error, the deadline
    /// passed, or the transport was not connected.
    #[error("{0}")]
    Rejected(ResponseError),

    /// Outbound message could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The pending request was dropped before it settled.
    #[error("request canceled")]
    Canceled,
}

impl ClientError {
    /// The rejection payload, if this is a rejected request.
    pub fn response_error(&self) -> Option<&ResponseError> {
        match self {
            Self::Rejected(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.response_error()
            .is_some_and(|r| r.error.is(&TIMEOUT_EXCEEDED))
    }

    pub fn is_invalid_state(&self) -> bool {
        self.response_error()
            .is_some_and(|r| r.error.is(&INVALID_STATE_ERR))
    }
}
