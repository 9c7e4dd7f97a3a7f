//! rpclink-ws: WebSocket transport channel for RpcLink.
//!
//! # Features
//! - One JSON message per text (or binary) frame
//! - Non-blocking `send`/`disconnect` via a per-connection socket task
//! - Close code and reason surfaced through `on_disconnect`

pub mod channel;

pub use channel::{WsChannel, WsChannelConfig};
