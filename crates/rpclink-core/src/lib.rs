//! rpclink-core: JSON-RPC 2.0 client protocol layer.
//!
//! # Overview
//!
//! Sits above any bidirectional message channel and turns an unordered
//! stream of inbound messages into settled requests and classified
//! notifications. The core crate defines:
//!
//! - [`ClientCore`]: connection lifecycle, `send_request`, `send_event`
//! - [`TransportChannel`]: the channel trait concrete transports implement
//! - [`CorrelationTracker`] / [`TimeoutTracker`]: pending requests with deadlines
//! - [`classify()`]: raw message → [`Message`] variant
//! - [`NotificationBus`] / [`BroadcastBus`]: `connecting`, `connected`,
//!   `disconnected`, `message`, `error`
//! - [`RpcError`] and the reserved codes [`NO_ERROR`], [`TIMEOUT_EXCEEDED`],
//!   [`INVALID_STATE_ERR`]
//! - [`memory`]: an in-process channel for tests and local wiring

use std::sync::{Mutex, MutexGuard};

pub mod bus;
pub mod classify;
pub mod client;
pub mod config;
pub mod correlation;
pub mod error;
pub mod memory;
pub mod message;
pub mod transport;

pub use bus::{
    BroadcastBus, MessageEvent, Notification, NotificationBus, NotificationFilter,
    NotificationKind, Subscription,
};
pub use classify::classify;
pub use client::{ClientCore, ConnectionState, RequestOptions};
pub use config::ClientConfig;
pub use correlation::{
    match_filter, CorrelationTracker, FilterArgs, MatchFilter, MatchOutcome, PendingEntry,
    PendingResponse, Settlement, TimeoutTracker, TrackerConfig,
};
pub use error::{
    ClientError, ReservedError, RpcError, TransportError, INVALID_STATE_ERR, NO_ERROR,
    TIMEOUT_EXCEEDED,
};
pub use memory::{memory_channel, MemoryChannel, MemoryPeer};
pub use message::{Event, Message, MessageKind, Request, ResponseError, ResponseResult, RpcId};
pub use transport::{DisconnectEvent, InboundHandler, TransportChannel};

/// Acquire a mutex guard, ignoring poisoning.
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
