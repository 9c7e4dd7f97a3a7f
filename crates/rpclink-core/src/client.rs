//! The client: connection lifecycle, outbound requests and events, and
//! routing of inbound traffic.
//!
//! Inbound flow:
//! ```text
//! transport → tracker.match_message ─matched──→ pending request settles
//!                                    └unmatched→ classify → bus "message"
//! ```

use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use serde_json::Value;

use crate::bus::{
    BroadcastBus, MessageEvent, Notification, NotificationBus, NotificationFilter, Subscription,
};
use crate::classify::classify;
use crate::config::ClientConfig;
use crate::correlation::{
    match_filter, CorrelationTracker, FilterArgs, MatchFilter, MatchOutcome, PendingEntry,
    PendingResponse, Settlement, TimeoutTracker,
};
use crate::error::{ClientError, RpcError, INVALID_STATE_ERR, NO_ERROR, TIMEOUT_EXCEEDED};
use crate::lock_ignore_poison;
use crate::message::{Event, Message, Request, ResponseError};
use crate::transport::{DisconnectEvent, InboundHandler, TransportChannel};

/// Connection lifecycle as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Per-request options for [`ClientCore::send_request_with`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Also publish the raw reply on the bus as `MessageEvent::Correlated`.
    pub enable_callbacks: bool,
    /// Opaque caller data kept with the pending entry.
    pub context: Option<Value>,
}

struct Inner {
    transport: Arc<dyn TransportChannel>,
    tracker: Arc<dyn CorrelationTracker>,
    bus: Arc<dyn NotificationBus>,
    filter: MatchFilter,
    state: Mutex<ConnectionState>,
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        let mut state = lock_ignore_poison(&self.state);
        if *state != next {
            tracing::debug!(from = %*state, to = %next, "connection state changed");
            *state = next;
        }
    }

    fn handle_message(&self, raw: Value) {
        match self.tracker.match_message(&raw) {
            MatchOutcome::Matched {
                id,
                enable_callbacks,
            } => {
                tracing::trace!(id = %id, "reply correlated");
                if enable_callbacks {
                    self.bus
                        .emit(Notification::Message(MessageEvent::Correlated(raw)));
                }
            }
            MatchOutcome::Unmatched => match classify(&raw) {
                Some(message) => {
                    tracing::debug!(kind = %message.kind(), "inbound message");
                    self.bus
                        .emit(Notification::Message(MessageEvent::Classified(message)));
                }
                None => tracing::trace!("dropping unclassifiable message"),
            },
        }
    }

    fn handle_disconnect(&self, event: DisconnectEvent) {
        self.set_state(ConnectionState::Disconnected);
        tracing::info!(
            url = %self.transport.url(),
            code = ?event.code,
            reason = %event.reason,
            pending = self.tracker.pending_count(),
            "disconnected"
        );
        self.bus.emit(Notification::Disconnected(event));
    }
}

/// Handler installed on the transport. Holds the client weakly so the
/// transport does not keep a dropped client alive.
struct Dispatcher(Weak<Inner>);

impl InboundHandler for Dispatcher {
    fn on_message(&self, raw: Value) {
        if let Some(inner) = self.0.upgrade() {
            inner.handle_message(raw);
        }
    }

    fn on_disconnect(&self, event: DisconnectEvent) {
        if let Some(inner) = self.0.upgrade() {
            inner.handle_disconnect(event);
        }
    }
}

/// Settles a pending request when an inbound message carries its id and a
/// `result` or `error`.
fn correlate(args: FilterArgs<'_>) -> Option<Settlement> {
    let id = args.message.get("id")?;
    if !args.current.id.matches(id) {
        return None;
    }
    match classify(args.message)? {
        Message::ResponseResult(result) => Some(Settlement::Resolve(result)),
        Message::ResponseError(error) => Some(Settlement::Reject(error)),
        Message::Request(_) | Message::Event(_) => None,
    }
}

fn to_wire<T: Serialize>(message: &T) -> Result<Value, ClientError> {
    Ok(serde_json::to_value(message)?)
}

/// JSON-RPC client over an arbitrary [`TransportChannel`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use rpclink_core::{memory_channel, ClientConfig, ClientCore, Request};
///
/// # async fn example() -> Result<(), rpclink_core::ClientError> {
/// let (channel, _peer) = memory_channel("mem");
/// let client = ClientCore::new(ClientConfig::new(Arc::new(channel)))?;
/// client.connect().await?;
///
/// let reply = client
///     .send_request(Request::new(1, "math.add", Some(serde_json::json!([1, 2]))))
///     .await?;
/// println!("{}", reply.result);
/// # Ok(())
/// # }
/// ```
pub struct ClientCore {
    inner: Arc<Inner>,
    config: ClientConfig,
}

impl ClientCore {
    /// Build a client and bind it to the configured transport.
    ///
    /// # Errors
    ///
    /// [`ClientError::Config`] if the transport is missing or a timing is zero.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let transport = config
            .transport
            .clone()
            .ok_or_else(|| ClientError::Config("a transport channel is required".into()))?;

        if config.reconnect {
            tracing::warn!(
                reconnect_after_ms = config.reconnect_after.as_millis() as u64,
                "reconnect is not implemented; flag ignored"
            );
        }

        let tracker = match &config.tracker {
            Some(tracker) => tracker.clone(),
            None => Arc::new(TimeoutTracker::new(config.tracker_config())) as Arc<dyn CorrelationTracker>,
        };
        let bus = match &config.bus {
            Some(bus) => bus.clone(),
            None => Arc::new(BroadcastBus::new()) as Arc<dyn NotificationBus>,
        };

        let inner = Arc::new(Inner {
            transport: transport.clone(),
            tracker,
            bus,
            filter: match_filter(correlate),
            state: Mutex::new(ConnectionState::Disconnected),
        });
        transport.bind(Arc::new(Dispatcher(Arc::downgrade(&inner))));

        Ok(Self { inner, config })
    }

    /// Open the transport.
    ///
    /// Emits `connecting` right away and `connected` on success. A transport
    /// failure is returned unchanged and emits nothing.
    ///
    /// Also starts the tracker's timeout sweep on the calling runtime, so
    /// requests sent later from threads outside any runtime still expire.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        inner.tracker.start();
        inner.set_state(ConnectionState::Connecting);
        inner.bus.emit(Notification::Connecting);
        tracing::info!(url = %inner.transport.url(), "connecting");

        match inner.transport.connect().await {
            Ok(()) => {
                inner.set_state(ConnectionState::Connected);
                tracing::info!(url = %inner.transport.url(), "connected");
                inner.bus.emit(Notification::Connected);
                Ok(())
            }
            Err(e) => {
                inner.set_state(ConnectionState::Disconnected);
                tracing::warn!(url = %inner.transport.url(), error = %e, "connect failed");
                Err(e.into())
            }
        }
    }

    /// Send a request and wait for its reply. See [`send_request_with`](Self::send_request_with).
    pub fn send_request(&self, req: Request) -> PendingResponse {
        self.send_request_with(req, RequestOptions::default())
    }

    /// Send a request and return its eventual outcome.
    ///
    /// If the transport is not connected the returned future is already
    /// failed with `INVALID_STATE_ERR` (carrying the request as `data`) and
    /// nothing is registered. Otherwise the request is registered before it
    /// is sent, and the future settles on the matching reply or on
    /// `TIMEOUT_EXCEEDED` once the configured timeout passes.
    ///
    /// Request ids must be unique among outstanding requests.
    pub fn send_request_with(&self, req: Request, options: RequestOptions) -> PendingResponse {
        let inner = &self.inner;
        let wire = match to_wire(&req) {
            Ok(wire) => wire,
            Err(e) => return PendingResponse::settled(Err(e)),
        };

        if !inner.transport.is_connected() {
            tracing::debug!(id = %req.id, method = %req.method, "request refused: not connected");
            let error = ResponseError::new(req.id, INVALID_STATE_ERR.with_data(wire));
            return PendingResponse::settled(Err(ClientError::Rejected(error)));
        }

        let id = req.id.clone();
        let entry = PendingEntry {
            timeout_reject_with: ResponseError::new(
                id.clone(),
                TIMEOUT_EXCEEDED.with_data(wire.clone()),
            ),
            message: req,
            filter: inner.filter.clone(),
            enable_callbacks: options.enable_callbacks,
            context: options.context,
        };
        let pending = inner.tracker.register(entry);

        if let Err(e) = inner.transport.send(wire) {
            inner.tracker.withdraw(&id);
            tracing::warn!(id = %id, error = %e, "request send failed");
            return PendingResponse::settled(Err(e.into()));
        }
        tracing::trace!(id = %id, "request sent");
        pending
    }

    /// Send a one-way event.
    ///
    /// Returns `NO_ERROR` when the event was handed to the transport and
    /// `INVALID_STATE_ERR` (with the event as `data`) when it was not.
    pub fn send_event(&self, evt: Event) -> RpcError {
        let inner = &self.inner;
        let wire = match to_wire(&evt) {
            Ok(wire) => wire,
            Err(e) => {
                tracing::warn!(method = %evt.method, error = %e, "event not serializable");
                return INVALID_STATE_ERR.to_error();
            }
        };

        if !inner.transport.is_connected() {
            tracing::debug!(method = %evt.method, "event refused: not connected");
            return INVALID_STATE_ERR.with_data(wire);
        }

        match inner.transport.send(wire.clone()) {
            Ok(()) => NO_ERROR.to_error(),
            Err(e) => {
                tracing::warn!(method = %evt.method, error = %e, "event send failed");
                INVALID_STATE_ERR.with_data(wire)
            }
        }
    }

    /// Ask the transport to close. The `disconnected` notification follows
    /// from the transport's own callback. Pending requests are left to time out.
    pub fn disconnect(&self) {
        tracing::info!(url = %self.inner.transport.url(), "disconnecting");
        self.inner.transport.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        *lock_ignore_poison(&self.inner.state)
    }

    /// Subscribe to notifications emitted from now on.
    pub fn subscribe(&self, filter: NotificationFilter) -> Subscription {
        self.inner.bus.subscribe(filter)
    }

    /// Number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.tracker.pending_count()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl std::fmt::Debug for ClientCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCore")
            .field("url", &self.inner.transport.url())
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Request, RpcId};
    use serde_json::json;

    fn args<'a>(message: &'a Value, current: &'a Request) -> FilterArgs<'a> {
        FilterArgs {
            message,
            current,
            enable_callbacks: false,
            context: None,
        }
    }

    #[test]
    fn correlate_result() {
        let req = Request::new(1, "m", None);
        let raw = json!({"id": 1, "result": [1]});
        match correlate(args(&raw, &req)) {
            Some(Settlement::Resolve(r)) => assert_eq!(r.result, json!([1])),
            other => panic!("expected resolve, got {other:?}"),
        }
    }

    #[test]
    fn correlate_error_over_result() {
        let req = Request::new("a", "m", None);
        let raw = json!({"id": "a", "result": 1, "error": {"code": 7, "message": "x"}});
        match correlate(args(&raw, &req)) {
            Some(Settlement::Reject(r)) => {
                assert_eq!(r.id, RpcId::String("a".into()));
                assert_eq!(r.error.code, 7);
            }
            other => panic!("expected reject, got {other:?}"),
        }
    }

    #[test]
    fn correlate_ignores_other_ids_and_requests() {
        let req = Request::new(1, "m", None);
        assert!(correlate(args(&json!({"id": 2, "result": 1}), &req)).is_none());
        assert!(correlate(args(&json!({"id": "1", "result": 1}), &req)).is_none());
        assert!(correlate(args(&json!({"id": 1, "method": "peer.call"}), &req)).is_none());
        assert!(correlate(args(&json!({"method": "evt"}), &req)).is_none());
    }

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }
}
