//! Shape-based classification of raw inbound messages.
//!
//! Precedence, for a message carrying an `id`:
//! ```text
//! result → ResponseResult
//! error  → ResponseError   (overrides result when both are present)
//! method → Request          (only when neither result nor error is present)
//! ```
//! Without an `id` the message is an Event.

use serde_json::Value;

use crate::error::RpcError;
use crate::message::{Event, Message, Request, ResponseError, ResponseResult, RpcId, JSONRPC_VERSION};

/// Classify a raw inbound message. `None` means the message has no
/// recognizable shape and should be dropped.
pub fn classify(raw: &Value) -> Option<Message> {
    let obj = raw.as_object()?;

    let Some(id) = obj.get("id") else {
        let method = obj.get("method")?.as_str()?;
        return Some(Message::Event(Event {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.to_string(),
            params: obj.get("params").cloned(),
        }));
    };
    let id = RpcId::from_value(id);

    let mut classified = None;
    if let Some(result) = obj.get("result") {
        classified = Some(Message::ResponseResult(ResponseResult::new(
            id.clone(),
            result.clone(),
        )));
    }
    if let Some(error) = obj.get("error") {
        classified = Some(Message::ResponseError(ResponseError::new(
            id.clone(),
            RpcError::from_value(error),
        )));
    }
    if classified.is_some() {
        return classified;
    }

    let method = obj.get("method")?.as_str()?;
    Some(Message::Request(Request {
        jsonrpc: JSONRPC_VERSION.into(),
        id,
        method: method.to_string(),
        params: obj.get("params").cloned(),
    }))
}
