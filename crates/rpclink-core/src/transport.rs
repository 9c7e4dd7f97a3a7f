//! The `TransportChannel` trait, the bidirectional conduit the client sits on.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

/// Payload reported when a channel closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectEvent {
    /// Close code, when the underlying protocol has one (e.g. WebSocket 1000).
    pub code: Option<u16>,
    pub reason: String,
}

impl DisconnectEvent {
    pub fn new(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Receiver for everything a channel delivers upward.
///
/// Called from the channel's own task; implementations must not block.
pub trait InboundHandler: Send + Sync {
    /// A decoded inbound message.
    fn on_message(&self, raw: Value);

    /// The connection ended, locally or remotely.
    fn on_disconnect(&self, event: DisconnectEvent);
}

/// The transport collaborator.
///
/// Delivery is unordered and at-most-once as far as the client is
/// concerned; framing and encoding are the channel's business.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn TransportChannel>`.
#[async_trait]
pub trait TransportChannel: Send + Sync + 'static {
    /// Install the inbound handler. Called once by the client at construction,
    /// before `connect`.
    fn bind(&self, handler: Arc<dyn InboundHandler>);

    /// Open the connection.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Queue one message for delivery. Must not wait on the network.
    fn send(&self, message: Value) -> Result<(), TransportError>;

    /// Begin closing. The handler's `on_disconnect` reports completion.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Return the channel's identifier (URL or name).
    fn url(&self) -> &str;
}
