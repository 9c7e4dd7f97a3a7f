//! WebSocket transport channel.
//!
//! One background task owns each open socket. Callers queue frames through
//! an unbounded command channel so `send` and `disconnect` never wait on the
//! network; the task multiplexes those commands with inbound frames.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use rpclink_core::error::TransportError;
use rpclink_core::transport::{DisconnectEvent, InboundHandler, TransportChannel};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the peer closes without a status.
const NO_STATUS_RECEIVED: u16 = 1005;

/// Configuration for [`WsChannel`].
#[derive(Debug, Clone)]
pub struct WsChannelConfig {
    /// Upper bound on the opening handshake.
    pub connect_timeout: Duration,
}

impl Default for WsChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Command sent from callers to the socket task.
enum WsCommand {
    Send(String),
    Close,
}

/// Handle on one open socket.
struct Connection {
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    live: Arc<AtomicBool>,
}

/// WebSocket text-frame channel carrying one JSON message per frame.
///
/// No automatic reconnect: once the socket closes, `connect` must be called
/// again.
pub struct WsChannel {
    url: String,
    config: WsChannelConfig,
    handler: Mutex<Option<Arc<dyn InboundHandler>>>,
    connection: Mutex<Option<Connection>>,
    /// Generation of the newest socket. A task whose generation is older
    /// has been replaced and stays quiet when it ends.
    generation: Arc<AtomicU64>,
}

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl WsChannel {
    pub fn new(url: impl Into<String>, config: WsChannelConfig) -> Self {
        Self {
            url: url.into(),
            config,
            handler: Mutex::new(None),
            connection: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Self {
        Self::new(url, WsChannelConfig::default())
    }
}

#[async_trait]
impl TransportChannel for WsChannel {
    fn bind(&self, handler: Arc<dyn InboundHandler>) {
        *lock_ignore_poison(&self.handler) = Some(handler);
    }

    /// Open a socket. Calling this while a socket is open replaces it: the
    /// old socket is closed without an `on_disconnect` upcall.
    async fn connect(&self) -> Result<(), TransportError> {
        tracing::info!(url = %self.url, "connecting via WebSocket");

        let timeout = self.config.connect_timeout;
        let (ws_stream, _) = tokio::time::timeout(
            timeout,
            tokio_tungstenite::connect_async(self.url.as_str()),
        )
        .await
        .map_err(|_| {
            TransportError::ConnectFailed(format!("handshake timed out after {}ms", timeout.as_millis()))
        })?
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let live = Arc::new(AtomicBool::new(true));
        let handler = lock_ignore_poison(&self.handler).clone();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // Replacing an older connection drops its sender, which closes it.
        *lock_ignore_poison(&self.connection) = Some(Connection {
            cmd_tx,
            live: live.clone(),
        });

        let task = WsTask {
            url: self.url.clone(),
            handler,
            live,
            generation,
            current: self.generation.clone(),
        };
        tokio::spawn(task.run(ws_stream, cmd_rx));
        Ok(())
    }

    fn send(&self, message: Value) -> Result<(), TransportError> {
        let text =
            serde_json::to_string(&message).map_err(|e| TransportError::Other(e.to_string()))?;
        let connection = lock_ignore_poison(&self.connection);
        match connection.as_ref() {
            Some(conn) if conn.live.load(Ordering::SeqCst) => conn
                .cmd_tx
                .send(WsCommand::Send(text))
                .map_err(|_| TransportError::Closed),
            _ => Err(TransportError::NotConnected),
        }
    }

    fn disconnect(&self) {
        if let Some(conn) = lock_ignore_poison(&self.connection).take() {
            let _ = conn.cmd_tx.send(WsCommand::Close);
        }
    }

    fn is_connected(&self) -> bool {
        lock_ignore_poison(&self.connection)
            .as_ref()
            .is_some_and(|conn| conn.live.load(Ordering::SeqCst))
    }

    fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Background task that owns one WebSocket connection.
struct WsTask {
    url: String,
    handler: Option<Arc<dyn InboundHandler>>,
    live: Arc<AtomicBool>,
    generation: u64,
    current: Arc<AtomicU64>,
}

impl WsTask {
    async fn run(self, ws_stream: WsStream, mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>) {
        let (mut sink, mut stream) = ws_stream.split();
        let handler = self.handler.as_deref();
        tracing::debug!(url = %self.url, generation = self.generation, "WS task started");

        let event = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(WsCommand::Send(text)) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            tracing::warn!(error = %e, "WS send failed");
                            break DisconnectEvent::new(None, e.to_string());
                        }
                    }
                    Some(WsCommand::Close) | None => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client disconnect".into(),
                        };
                        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                            tracing::debug!(error = %e, "WS close frame not sent");
                        }
                        break DisconnectEvent::new(Some(u16::from(CloseCode::Normal)), "client disconnect");
                    }
                },
                msg = stream.next() => match msg {
                    None => break DisconnectEvent::new(None, "stream closed"),
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WS receive error");
                        break DisconnectEvent::new(None, e.to_string());
                    }
                    Some(Ok(Message::Text(text))) => deliver(handler, text.as_bytes()),
                    Some(Ok(Message::Binary(bytes))) => deliver(handler, &bytes),
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => DisconnectEvent::new(Some(u16::from(frame.code)), frame.reason.to_string()),
                            None => DisconnectEvent::new(Some(NO_STATUS_RECEIVED), ""),
                        };
                    }
                    Some(Ok(_)) => {}
                }
            }
        };

        self.live.store(false, Ordering::SeqCst);
        if self.current.load(Ordering::SeqCst) != self.generation {
            tracing::debug!(url = %self.url, generation = self.generation, "replaced WS connection closed");
            return;
        }
        tracing::info!(url = %self.url, code = ?event.code, reason = %event.reason, "WS disconnected");
        if let Some(handler) = handler {
            handler.on_disconnect(event);
        }
    }
}

fn deliver(handler: Option<&dyn InboundHandler>, payload: &[u8]) {
    let Ok(raw) = serde_json::from_slice::<Value>(payload) else {
        tracing::debug!("failed to parse WS frame as JSON");
        return;
    };
    if let Some(handler) = handler {
        handler.on_message(raw);
    }
}
