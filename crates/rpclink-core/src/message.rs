//! JSON-RPC 2.0 wire types.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::RpcError;

/// Protocol version tag written on every outbound message.
pub const JSONRPC_VERSION: &str = "2.0";

fn version() -> String {
    JSONRPC_VERSION.into()
}

/// JSON-RPC request ID: string, number, or null.
///
/// Numbers keep their JSON form, so negative and fractional ids echo back
/// exactly as the peer sent them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(Number),
    String(String),
    Null,
}

impl RpcId {
    /// Returns `true` if a raw inbound `id` value is the same JSON value as
    /// this id. Numbers compare by value (`1.0` matches `1`), but there is no
    /// string coercion: `1` and `"1"` are different ids.
    pub fn matches(&self, raw: &Value) -> bool {
        match (self, raw) {
            (Self::Number(n), Value::Number(v)) => same_number(n, v),
            (Self::String(s), Value::String(v)) => s == v,
            (Self::Null, Value::Null) => true,
            _ => false,
        }
    }

    /// Decode an id from a raw value. Anything that is not a number or a
    /// string maps to `Null`.
    pub fn from_value(raw: &Value) -> Self {
        match raw {
            Value::Number(n) => Self::Number(n.clone()),
            Value::String(s) => Self::String(s.clone()),
            _ => Self::Null,
        }
    }
}

fn same_number(a: &Number, b: &Number) -> bool {
    if a == b {
        return true;
    }
    // Integers compare exactly; only a float on either side falls back to f64.
    (a.is_f64() || b.is_f64()) && a.as_f64() == b.as_f64()
}

macro_rules! id_from_int {
    ($($t:ty),*) => {$(
        impl From<$t> for RpcId {
            fn from(n: $t) -> Self {
                Self::Number(Number::from(n))
            }
        }
    )*};
}

id_from_int!(i32, i64, u32, u64);

impl From<&str> for RpcId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for RpcId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A JSON-RPC 2.0 request, outbound or received from the peer.
///
/// `params` is either an ordered sequence or a keyed mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "version")]
    pub jsonrpc: String,
    pub id: RpcId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(id: impl Into<RpcId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: version(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A one-way notification: no id, never correlated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default = "version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Event {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: version(),
            method: method.into(),
            params,
        }
    }
}

/// A successful response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseResult {
    #[serde(default = "version")]
    pub jsonrpc: String,
    pub id: RpcId,
    pub result: Value,
}

impl ResponseResult {
    pub fn new(id: RpcId, result: Value) -> Self {
        Self {
            jsonrpc: version(),
            id,
            result,
        }
    }
}

/// A failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    #[serde(default = "version")]
    pub jsonrpc: String,
    pub id: RpcId,
    pub error: RpcError,
}

impl ResponseError {
    pub fn new(id: RpcId, error: RpcError) -> Self {
        Self {
            jsonrpc: version(),
            id,
            error,
        }
    }
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request {} failed: {}", self.id, self.error)
    }
}

/// Which of the four message shapes a [`Message`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    ResponseResult,
    ResponseError,
    Request,
    Event,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResponseResult => write!(f, "response-result"),
            Self::ResponseError => write!(f, "response-error"),
            Self::Request => write!(f, "request"),
            Self::Event => write!(f, "event"),
        }
    }
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ResponseResult(ResponseResult),
    ResponseError(ResponseError),
    /// A request from the peer; the reply must carry the same id.
    Request(Request),
    Event(Event),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::ResponseResult(_) => MessageKind::ResponseResult,
            Self::ResponseError(_) => MessageKind::ResponseError,
            Self::Request(_) => MessageKind::Request,
            Self::Event(_) => MessageKind::Event,
        }
    }

    /// Serialize back to the wire shape.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::ResponseResult(r) => serde_json::to_value(r),
            Self::ResponseError(r) => serde_json::to_value(r),
            Self::Request(r) => serde_json::to_value(r),
            Self::Event(e) => serde_json::to_value(e),
        }
    }
}
