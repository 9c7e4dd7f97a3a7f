//! End-to-end tests for `ClientCore` over the in-memory channel.
//!
//! Each test wires a client to a `MemoryPeer` that plays the remote side,
//! then checks requests, events, notifications and timeouts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rpclink_core::{
    memory_channel, ClientConfig, ClientCore, ClientError, ConnectionState, DisconnectEvent,
    Event, MemoryPeer, Message, MessageEvent, Notification, NotificationFilter,
    NotificationKind, Request, RequestOptions, RpcId, Subscription, TransportError,
    INVALID_STATE_ERR, NO_ERROR, TIMEOUT_EXCEEDED,
};
use serde_json::json;

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn client_with(timeout: Duration) -> (ClientCore, MemoryPeer) {
    let (channel, peer) = memory_channel("mem://test");
    let config = ClientConfig::new(Arc::new(channel))
        .with_message_check_interval(Duration::from_millis(10))
        .with_message_timeout(timeout);
    (ClientCore::new(config).expect("valid config"), peer)
}

fn client() -> (ClientCore, MemoryPeer) {
    client_with(Duration::from_secs(5))
}

async fn connected_client() -> (ClientCore, MemoryPeer) {
    let (client, peer) = client();
    client.connect().await.expect("connect");
    (client, peer)
}

async fn next(sub: &mut Subscription) -> Notification {
    tokio::time::timeout(Duration::from_secs(1), sub.recv())
        .await
        .expect("notification within 1s")
        .expect("bus open")
}

// ─── Construction ─────────────────────────────────────────────────────────────

#[test]
fn construction_requires_transport() {
    let err = ClientCore::new(ClientConfig::default()).unwrap_err();
    assert!(matches!(err, ClientError::Config(_)));
}

#[test]
fn construction_accepts_reconnect_flags() {
    let (channel, _peer) = memory_channel("mem");
    let config = ClientConfig::new(Arc::new(channel))
        .with_reconnect(true, Duration::from_millis(250));
    let client = ClientCore::new(config).expect("reconnect flags are accepted");
    assert!(client.config().reconnect);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

// ─── Connect ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn connect_emits_connecting_then_connected() {
    let (client, _peer) = client();
    let mut sub = client.subscribe(NotificationFilter::all());

    client.connect().await.unwrap();

    assert_eq!(next(&mut sub).await, Notification::Connecting);
    assert_eq!(next(&mut sub).await, Notification::Connected);
    assert!(client.is_connected());
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn connect_failure_passes_through_without_lifecycle_event() {
    let (client, peer) = client();
    let mut sub = client.subscribe(NotificationFilter::all());
    peer.fail_next_connect(TransportError::ConnectFailed("refused".into()));

    let err = client.connect().await.unwrap_err();
    match err {
        ClientError::Transport(TransportError::ConnectFailed(reason)) => {
            assert_eq!(reason, "refused")
        }
        other => panic!("expected transport error, got {other:?}"),
    }

    assert_eq!(next(&mut sub).await, Notification::Connecting);
    assert_eq!(sub.try_recv().unwrap(), None);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

// ─── Requests ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn request_resolves_with_result() {
    let (client, mut peer) = connected_client().await;

    let pending = client.send_request(Request::new(1, "math.add", Some(json!([2, 3]))));
    let sent = peer.recv().await.unwrap();
    assert_eq!(sent["method"], "math.add");
    assert_eq!(sent["id"], 1);
    assert_eq!(client.pending_count(), 1);

    peer.deliver(json!({"jsonrpc": "2.0", "id": 1, "result": 5}));

    let reply = pending.await.unwrap();
    assert_eq!(reply.id, RpcId::from(1));
    assert_eq!(reply.result, json!(5));
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn request_rejects_with_error_reply() {
    let (client, peer) = connected_client().await;

    let pending = client.send_request(Request::new("q", "missing", None));
    peer.deliver(json!({"id": "q", "error": {"code": -32601, "message": "Method not found"}}));

    let err = pending.await.unwrap_err();
    let rejected = err.response_error().expect("rejected");
    assert_eq!(rejected.id, RpcId::String("q".into()));
    assert_eq!(rejected.error.code, -32601);
}

#[tokio::test]
async fn error_wins_when_reply_has_result_and_error() {
    let (client, peer) = connected_client().await;

    let pending = client.send_request(Request::new(3, "m", None));
    peer.deliver(json!({"id": 3, "result": "ok", "error": {"code": 9, "message": "no"}}));

    let err = pending.await.unwrap_err();
    assert_eq!(err.response_error().unwrap().error.code, 9);
}

#[tokio::test]
async fn request_times_out_with_request_as_data() {
    let (client, mut peer) = client_with(Duration::from_millis(50));
    client.connect().await.unwrap();

    let req = Request::new(7, "slow", Some(json!({"n": 1})));
    let started = Instant::now();
    let err = client.send_request(req.clone()).await.unwrap_err();

    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(err.is_timeout());
    let rejected = err.response_error().unwrap();
    assert!(rejected.error.is(&TIMEOUT_EXCEEDED));
    assert_eq!(rejected.error.data, Some(serde_json::to_value(&req).unwrap()));
    assert_eq!(client.pending_count(), 0);

    // The request did go out.
    assert_eq!(peer.try_recv().unwrap()["method"], "slow");
}

#[tokio::test]
async fn late_reply_after_timeout_is_classified_not_correlated() {
    let (client, peer) = client_with(Duration::from_millis(20));
    client.connect().await.unwrap();
    let mut sub = client.subscribe(NotificationFilter::only([NotificationKind::Message]));

    let err = client.send_request(Request::new(8, "slow", None)).await.unwrap_err();
    assert!(err.is_timeout());

    peer.deliver(json!({"id": 8, "result": "late"}));
    match next(&mut sub).await {
        Notification::Message(MessageEvent::Classified(Message::ResponseResult(r))) => {
            assert_eq!(r.result, json!("late"))
        }
        other => panic!("expected classified result, got {other:?}"),
    }
}

#[tokio::test]
async fn request_while_disconnected_fails_immediately() {
    let (client, mut peer) = client();

    let req = Request::new(1, "m", None);
    let pending = client.send_request(req.clone());
    assert!(pending.is_settled());
    assert_eq!(client.pending_count(), 0);

    let err = tokio::time::timeout(Duration::from_millis(5), pending)
        .await
        .expect("no waiting on a disconnected send")
        .unwrap_err();
    assert!(err.is_invalid_state());
    let rejected = err.response_error().unwrap();
    assert_eq!(rejected.error.code, INVALID_STATE_ERR.code);
    assert_eq!(rejected.error.data, Some(serde_json::to_value(&req).unwrap()));
    assert!(peer.try_recv().is_none());
}

#[tokio::test]
async fn concurrent_requests_settle_independently() {
    let (client, peer) = connected_client().await;

    let first = client.send_request(Request::new(1, "a", None));
    let second = client.send_request(Request::new(2, "b", None));
    assert_eq!(client.pending_count(), 2);

    peer.deliver(json!({"id": 2, "error": {"code": 1, "message": "b failed"}}));
    peer.deliver(json!({"id": 1, "result": "a done"}));
    // Duplicate reply for an already-settled id goes to the bus, not the request.
    peer.deliver(json!({"id": 1, "result": "again"}));

    let (first, second) = tokio::join!(first, second);
    assert_eq!(first.unwrap().result, json!("a done"));
    assert_eq!(second.unwrap_err().response_error().unwrap().error.code, 1);
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn enable_callbacks_republishes_raw_reply() {
    let (client, peer) = connected_client().await;
    let mut sub = client.subscribe(NotificationFilter::only([NotificationKind::Message]));

    let pending = client.send_request_with(
        Request::new(4, "watch", None),
        RequestOptions {
            enable_callbacks: true,
            context: Some(json!({"caller": "test"})),
        },
    );
    let raw = json!({"id": 4, "result": [1, 2]});
    peer.deliver(raw.clone());

    assert_eq!(pending.await.unwrap().result, json!([1, 2]));
    assert_eq!(
        next(&mut sub).await,
        Notification::Message(MessageEvent::Correlated(raw))
    );
}

#[tokio::test]
async fn correlated_reply_is_not_republished_by_default() {
    let (client, peer) = connected_client().await;
    let mut sub = client.subscribe(NotificationFilter::only([NotificationKind::Message]));

    let pending = client.send_request(Request::new(5, "m", None));
    peer.deliver(json!({"id": 5, "result": true}));
    pending.await.unwrap();

    assert_eq!(sub.try_recv().unwrap(), None);
}

#[tokio::test]
async fn duplicate_id_replaces_earlier_request() {
    let (client, peer) = connected_client().await;

    let first = client.send_request(Request::new(1, "a", None));
    let second = client.send_request(Request::new(1, "b", None));
    assert_eq!(client.pending_count(), 1);
    assert!(matches!(first.await, Err(ClientError::Canceled)));

    peer.deliver(json!({"id": 1, "result": "b done"}));
    assert_eq!(second.await.unwrap().result, json!("b done"));
}

#[tokio::test]
async fn send_failure_withdraws_request() {
    let (client, peer) = connected_client().await;
    // The channel stays connected but nothing can receive.
    drop(peer);
    assert!(client.is_connected());

    let pending = client.send_request(Request::new(1, "m", None));
    assert!(pending.is_settled());
    assert_eq!(client.pending_count(), 0);
    match pending.await {
        Err(ClientError::Transport(TransportError::Closed)) => {}
        other => panic!("expected transport error, got {other:?}"),
    }

    assert!(client.send_event(Event::new("log", None)).is(&INVALID_STATE_ERR));
}

#[tokio::test]
async fn request_from_thread_outside_runtime_still_times_out() {
    let (client, _peer) = client_with(Duration::from_millis(50));
    client.connect().await.unwrap();

    let pending = std::thread::scope(|s| {
        s.spawn(|| client.send_request(Request::new(11, "slow", None)))
            .join()
            .unwrap()
    });

    let err = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("settles by timeout")
        .unwrap_err();
    assert!(err.is_timeout());
}

// ─── Events ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn send_event_when_connected() {
    let (client, mut peer) = connected_client().await;

    let status = client.send_event(Event::new("log", Some(json!(["hello"]))));
    assert!(status.is(&NO_ERROR));
    assert!(status.data.is_none());

    let sent = peer.try_recv().unwrap();
    assert_eq!(sent["method"], "log");
    assert!(sent.get("id").is_none());
}

#[tokio::test]
async fn send_event_when_disconnected() {
    let (client, mut peer) = client();

    let evt = Event::new("log", None);
    let status = client.send_event(evt.clone());
    assert!(status.is(&INVALID_STATE_ERR));
    assert_eq!(status.data, Some(serde_json::to_value(&evt).unwrap()));
    assert!(peer.try_recv().is_none());
}

// ─── Inbound classification ───────────────────────────────────────────────────

#[tokio::test]
async fn inbound_event_and_request_are_published() {
    let (client, peer) = connected_client().await;
    let mut sub = client.subscribe(NotificationFilter::only([NotificationKind::Message]));

    peer.deliver(json!({"method": "price.tick", "params": {"last": 101}}));
    peer.deliver(json!({"id": 42, "method": "ui.confirm", "params": ["sure?"]}));

    match next(&mut sub).await {
        Notification::Message(MessageEvent::Classified(Message::Event(e))) => {
            assert_eq!(e.method, "price.tick");
            assert_eq!(e.params, Some(json!({"last": 101})));
        }
        other => panic!("expected event, got {other:?}"),
    }
    match next(&mut sub).await {
        Notification::Message(MessageEvent::Classified(Message::Request(r))) => {
            assert_eq!(r.id, RpcId::from(42));
            assert_eq!(r.method, "ui.confirm");
        }
        other => panic!("expected request, got {other:?}"),
    }
}

#[tokio::test]
async fn unmatched_error_reply_is_published_with_error_precedence() {
    let (client, peer) = connected_client().await;
    let mut sub = client.subscribe(NotificationFilter::only([NotificationKind::Message]));

    peer.deliver(json!({"id": 99, "result": 1, "error": {"code": 2, "message": "x"}}));

    match next(&mut sub).await {
        Notification::Message(MessageEvent::Classified(Message::ResponseError(r))) => {
            assert_eq!(r.error.code, 2)
        }
        other => panic!("expected response error, got {other:?}"),
    }
}

#[tokio::test]
async fn shapeless_messages_are_dropped_silently() {
    let (client, peer) = connected_client().await;
    let mut sub = client.subscribe(NotificationFilter::all());

    peer.deliver(json!("not an object"));
    peer.deliver(json!({"id": 1}));
    peer.deliver(json!({"params": [1, 2]}));

    assert_eq!(sub.try_recv().unwrap(), None);
}

// ─── Disconnect ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn disconnect_emits_disconnected_via_transport() {
    let (client, _peer) = connected_client().await;
    let mut sub = client.subscribe(NotificationFilter::only([NotificationKind::Disconnected]));

    client.disconnect();

    match next(&mut sub).await {
        Notification::Disconnected(event) => assert_eq!(event.code, Some(1000)),
        other => panic!("expected disconnected, got {other:?}"),
    }
    assert!(!client.is_connected());
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn remote_drop_leaves_pending_requests_to_time_out() {
    let (client, peer) = client_with(Duration::from_millis(60));
    client.connect().await.unwrap();
    let mut sub = client.subscribe(NotificationFilter::only([NotificationKind::Disconnected]));

    let pending = client.send_request(Request::new(1, "m", None));
    let event = DisconnectEvent::new(Some(1006), "abnormal closure");
    assert!(peer.drop_connection(event.clone()));

    assert_eq!(next(&mut sub).await, Notification::Disconnected(event));
    assert_eq!(client.pending_count(), 1);

    let err = pending.await.unwrap_err();
    assert!(err.is_timeout());
}
