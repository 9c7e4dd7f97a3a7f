//! # Notification Bus
//!
//! Named lifecycle and message notifications published by the client:
//! `connecting`, `connected`, `disconnected`, `message`, `error`.
//!
//! The default [`BroadcastBus`] fans every notification out to all live
//! subscriptions; each subscription filters by kind on its side.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::error::RpcError;
use crate::message::Message;
use crate::transport::DisconnectEvent;

/// Default channel capacity for the broadcast bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Payload of a `message` notification.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageEvent {
    /// An inbound message that did not correlate to a pending request.
    Classified(Message),
    /// The raw reply to a request sent with callbacks enabled.
    Correlated(Value),
}

/// Something the client announces.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Connecting,
    Connected,
    Disconnected(DisconnectEvent),
    Message(MessageEvent),
    /// Reserved for collaborators; the client itself never emits it.
    Error(RpcError),
}

/// The event name of a [`Notification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Connecting,
    Connected,
    Disconnected,
    Message,
    Error,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Message => "message",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::Connecting => NotificationKind::Connecting,
            Self::Connected => NotificationKind::Connected,
            Self::Disconnected(_) => NotificationKind::Disconnected,
            Self::Message(_) => NotificationKind::Message,
            Self::Error(_) => NotificationKind::Error,
        }
    }
}

/// Which notification kinds a subscription wants. Empty means all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationFilter {
    kinds: Vec<NotificationKind>,
}

impl NotificationFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only(kinds: impl IntoIterator<Item = NotificationKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    pub fn matches(&self, notification: &Notification) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&notification.kind())
    }
}

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The bus was dropped.
    #[error("notification bus closed")]
    Closed,
}

/// Publish/subscribe surface the client reports through.
pub trait NotificationBus: Send + Sync {
    /// Publish a notification. Returns how many subscriptions received it.
    fn emit(&self, notification: Notification) -> usize;

    /// Open a subscription for notifications emitted from now on.
    fn subscribe(&self, filter: NotificationFilter) -> Subscription;
}

/// In-memory bus on `tokio::sync::broadcast`.
pub struct BroadcastBus {
    sender: broadcast::Sender<Notification>,
    emitted: AtomicU64,
}

impl BroadcastBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            emitted: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Total notifications emitted, delivered or not.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBus for BroadcastBus {
    fn emit(&self, notification: Notification) -> usize {
        let kind = notification.kind();
        self.emitted.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(notification) {
            Ok(receivers) => {
                trace!(kind = %kind, receivers, "notification emitted");
                receivers
            }
            Err(_) => {
                trace!(kind = %kind, "notification dropped (no subscribers)");
                0
            }
        }
    }

    fn subscribe(&self, filter: NotificationFilter) -> Subscription {
        debug!(kinds = ?filter.kinds, "new notification subscription");
        Subscription {
            receiver: self.sender.subscribe(),
            filter,
        }
    }
}

/// A subscription handle. Dropping it unsubscribes.
pub struct Subscription {
    receiver: broadcast::Receiver<Notification>,
    filter: NotificationFilter,
}

impl Subscription {
    /// Next matching notification; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            let notification = match self.receiver.recv().await {
                Ok(n) => n,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(lagged = count, "subscriber lagged, notifications dropped");
                    continue;
                }
            };
            if self.filter.matches(&notification) {
                return Some(notification);
            }
        }
    }

    /// Non-blocking form of [`recv`](Self::recv). `Ok(None)` means nothing queued.
    pub fn try_recv(&mut self) -> Result<Option<Notification>, SubscriptionError> {
        loop {
            let notification = match self.receiver.try_recv() {
                Ok(n) => n,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SubscriptionError::Closed)
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            };
            if self.filter.matches(&notification) {
                return Ok(Some(notification));
            }
        }
    }

    pub fn filter(&self) -> &NotificationFilter {
        &self.filter
    }
}
