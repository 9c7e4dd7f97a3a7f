//! In-process transport channel.
//!
//! [`memory_channel`] returns the client-facing [`MemoryChannel`] and a
//! [`MemoryPeer`] that plays the remote side: it sees every message the
//! client sends, injects inbound traffic, and can drop the connection or
//! refuse the next connect.
//!
//! This is the reference behavior for channel semantics:
//! - inbound delivery is synchronous and in injection order;
//! - `send` on a closed channel fails with `NotConnected`;
//! - `disconnect` reports `on_disconnect` exactly once per open connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::lock_ignore_poison;
use crate::transport::{DisconnectEvent, InboundHandler, TransportChannel};

/// Close code reported for a locally requested disconnect.
pub const NORMAL_CLOSURE: u16 = 1000;

struct Shared {
    connected: AtomicBool,
    fail_next_connect: Mutex<Option<TransportError>>,
    handler: Mutex<Option<Arc<dyn InboundHandler>>>,
    outbound: mpsc::UnboundedSender<Value>,
}

impl Shared {
    fn handler(&self) -> Option<Arc<dyn InboundHandler>> {
        lock_ignore_poison(&self.handler).clone()
    }

    /// Mark closed and notify, if currently open.
    fn close(&self, event: DisconnectEvent) -> bool {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return false;
        }
        tracing::debug!(code = ?event.code, reason = %event.reason, "memory channel closed");
        if let Some(handler) = self.handler() {
            handler.on_disconnect(event);
        }
        true
    }
}

/// Client side of an in-memory channel.
pub struct MemoryChannel {
    name: String,
    shared: Arc<Shared>,
}

/// Remote side of an in-memory channel.
pub struct MemoryPeer {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedReceiver<Value>,
}

/// Create a connected pair. The channel starts disconnected.
pub fn memory_channel(name: impl Into<String>) -> (MemoryChannel, MemoryPeer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        connected: AtomicBool::new(false),
        fail_next_connect: Mutex::new(None),
        handler: Mutex::new(None),
        outbound: tx,
    });
    let channel = MemoryChannel {
        name: name.into(),
        shared: shared.clone(),
    };
    let peer = MemoryPeer {
        shared,
        outbound: rx,
    };
    (channel, peer)
}

#[async_trait]
impl TransportChannel for MemoryChannel {
    fn bind(&self, handler: Arc<dyn InboundHandler>) {
        *lock_ignore_poison(&self.shared.handler) = Some(handler);
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if let Some(err) = lock_ignore_poison(&self.shared.fail_next_connect).take() {
            return Err(err);
        }
        self.shared.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send(&self, message: Value) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.shared
            .outbound
            .send(message)
            .map_err(|_| TransportError::Closed)
    }

    fn disconnect(&self) {
        self.shared
            .close(DisconnectEvent::new(Some(NORMAL_CLOSURE), "client disconnect"));
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn url(&self) -> &str {
        &self.name
    }
}

impl MemoryPeer {
    /// Next message the client sent, waiting if none is queued.
    pub async fn recv(&mut self) -> Option<Value> {
        self.outbound.recv().await
    }

    /// Next message the client sent, if one is queued.
    pub fn try_recv(&mut self) -> Option<Value> {
        self.outbound.try_recv().ok()
    }

    /// Deliver a raw message to the client. Returns `false` (and drops the
    /// message) when the channel is not connected.
    pub fn deliver(&self, raw: Value) -> bool {
        if !self.shared.connected.load(Ordering::SeqCst) {
            tracing::debug!("memory peer dropped message: channel closed");
            return false;
        }
        match self.shared.handler() {
            Some(handler) => {
                handler.on_message(raw);
                true
            }
            None => false,
        }
    }

    /// Close from the remote side.
    pub fn drop_connection(&self, event: DisconnectEvent) -> bool {
        self.shared.close(event)
    }

    /// Make the next `connect` fail with `err`.
    pub fn fail_next_connect(&self, err: TransportError) {
        *lock_ignore_poison(&self.shared.fail_next_connect) = Some(err);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}
