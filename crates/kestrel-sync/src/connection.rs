//! WebSocket connection manager.
//!
//! Owns at most one logical connection, bound to a session ID. Reconnection
//! is invisible to callers: transport errors feed a linear-backoff retry
//! loop, and consumers observe only state transitions via the synthetic
//! `connected` / `disconnected` events on the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::dispatcher::EventDispatcher;
use crate::protocol::{ClientFrame, event};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connectivity state for the bound session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection, and no retry scheduled.
    Disconnected,
    /// Opening the socket, or waiting out a backoff delay.
    Connecting,
    /// Socket open.
    Connected,
}

/// Reconnection tuning.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionOptions {
    /// One backoff "time unit". The Nth reconnect attempt waits `N × unit`.
    pub backoff_unit: Duration,
    /// Retry attempts before giving up until the next explicit `connect`.
    pub max_attempts: u32,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            backoff_unit: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

struct Inner {
    /// Bumped by `connect`/`disconnect`; run loops from older generations
    /// must not touch shared state.
    generation: u64,
    session_id: Option<String>,
    state: ConnectionState,
    attempts: u32,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

/// Zero-or-one logical WebSocket connection per active session.
pub struct ConnectionManager {
    ws_base: String,
    options: ConnectionOptions,
    dispatcher: Arc<EventDispatcher>,
    inner: Mutex<Inner>,
}

impl ConnectionManager {
    /// Create a manager targeting `ws_base` (e.g. `ws://host:port/api/ws`);
    /// the session ID is appended per connection.
    pub fn new(ws_base: impl Into<String>, dispatcher: Arc<EventDispatcher>) -> Arc<Self> {
        Self::with_options(ws_base, dispatcher, ConnectionOptions::default())
    }

    /// Create a manager with explicit reconnection tuning.
    pub fn with_options(
        ws_base: impl Into<String>,
        dispatcher: Arc<EventDispatcher>,
        options: ConnectionOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            ws_base: ws_base.into(),
            options,
            dispatcher,
            inner: Mutex::new(Inner {
                generation: 0,
                session_id: None,
                state: ConnectionState::Disconnected,
                attempts: 0,
                outbound: None,
                task: None,
            }),
        })
    }

    /// The dispatcher this manager publishes to.
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Bind to `session_id` and open a connection, closing any previous one.
    pub fn connect(self: &Arc<Self>, session_id: &str) {
        let was_connected;
        let generation;
        {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            generation = inner.generation;
            was_connected = inner.state == ConnectionState::Connected;
            if let Some(task) = inner.task.take() {
                task.abort();
            }
            inner.outbound = None;
            inner.session_id = Some(session_id.to_string());
            inner.state = ConnectionState::Connecting;
            inner.attempts = 0;

            let manager = Arc::clone(self);
            let session = session_id.to_string();
            inner.task = Some(tokio::spawn(async move {
                manager.run(session, generation).await;
            }));
        }
        if was_connected {
            let _ = self.dispatcher.emit(event::DISCONNECTED, &json!({}));
        }
        debug!(session_id, "connection bound");
    }

    /// Close the connection, clear the bound session, and suppress any
    /// further reconnection. Unconditional and immediate for the caller.
    pub fn disconnect(&self) {
        let was_connected;
        {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            was_connected = inner.state == ConnectionState::Connected;
            if let Some(task) = inner.task.take() {
                task.abort();
            }
            inner.outbound = None;
            inner.session_id = None;
            inner.state = ConnectionState::Disconnected;
            inner.attempts = 0;
        }
        if was_connected {
            let _ = self.dispatcher.emit(event::DISCONNECTED, &json!({}));
        }
        debug!("connection released");
    }

    /// Send a typed frame. Documented no-op when the socket is not open:
    /// at-most-once, fire-and-forget, nothing is queued.
    ///
    /// Returns `true` if the frame was handed to the socket writer.
    pub fn send(&self, frame: &ClientFrame) -> bool {
        match serde_json::to_string(frame) {
            Ok(text) => self.send_text(text),
            Err(error) => {
                warn!(%error, "failed to serialize outbound frame");
                false
            }
        }
    }

    /// Send a raw `{type, ...payload}` envelope. `payload` must be a JSON
    /// object; its fields are merged beside the `type` tag.
    pub fn send_raw(&self, frame_type: &str, payload: &Value) -> bool {
        let mut envelope = match payload {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        let _ = envelope.insert("type".into(), Value::String(frame_type.into()));
        match serde_json::to_string(&Value::Object(envelope)) {
            Ok(text) => self.send_text(text),
            Err(_) => false,
        }
    }

    fn send_text(&self, text: String) -> bool {
        let inner = self.inner.lock();
        if inner.state != ConnectionState::Connected {
            debug!("dropping outbound frame: connection not open");
            return false;
        }
        match &inner.outbound {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }

    /// Current connectivity state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Whether the socket is open right now.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The bound session ID, if any.
    pub fn session_id(&self) -> Option<String> {
        self.inner.lock().session_id.clone()
    }

    /// Reconnect attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.lock().generation == generation
    }

    // ─── Run loop ────────────────────────────────────────────────────────

    async fn run(self: Arc<Self>, session_id: String, generation: u64) {
        loop {
            if !self.is_current(generation) {
                return;
            }
            let url = format!("{}/{session_id}", self.ws_base);
            match connect_async(url.as_str()).await {
                Ok((ws, _)) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    {
                        let mut inner = self.inner.lock();
                        if inner.generation != generation {
                            return;
                        }
                        inner.state = ConnectionState::Connected;
                        inner.attempts = 0;
                        inner.outbound = Some(tx);
                    }
                    debug!(session_id, "websocket open");
                    let _ = self.dispatcher.emit(event::CONNECTED, &json!({}));

                    self.pump(ws, rx).await;

                    {
                        let mut inner = self.inner.lock();
                        if inner.generation != generation {
                            return;
                        }
                        inner.outbound = None;
                        inner.state = ConnectionState::Connecting;
                    }
                    debug!(session_id, "websocket closed");
                    let _ = self.dispatcher.emit(event::DISCONNECTED, &json!({}));
                }
                Err(error) => {
                    debug!(session_id, %error, "websocket open failed");
                }
            }

            let delay = {
                let mut inner = self.inner.lock();
                if inner.generation != generation {
                    return;
                }
                inner.attempts += 1;
                if inner.attempts > self.options.max_attempts {
                    inner.state = ConnectionState::Disconnected;
                    inner.outbound = None;
                    warn!(
                        session_id,
                        attempts = self.options.max_attempts,
                        "reconnect attempts exhausted; staying disconnected"
                    );
                    return;
                }
                inner.state = ConnectionState::Connecting;
                backoff_delay(inner.attempts, self.options.backoff_unit)
            };
            tokio::time::sleep(delay).await;
        }
    }

    /// Shovel frames both ways until the socket closes or the writer side
    /// is dropped.
    async fn pump(&self, ws: WsStream, mut rx: mpsc::UnboundedReceiver<String>) {
        let (mut ws_tx, mut ws_rx) = ws.split();
        loop {
            tokio::select! {
                outbound = rx.recv() => {
                    let Some(text) = outbound else { break };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                inbound = ws_rx.next() => {
                    let Some(Ok(message)) = inbound else { break };
                    match message {
                        WsMessage::Text(text) => self.forward(text.as_str()),
                        WsMessage::Close(_) => break,
                        // Pings are answered by tungstenite internally
                        _ => {}
                    }
                }
            }
        }
    }

    /// Parse one inbound frame and publish it under its `type` tag.
    /// Malformed frames are dropped and logged, never fatal.
    fn forward(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(error) => {
                warn!(%error, "dropping malformed frame");
                return;
            }
        };
        let Some(frame_type) = value.get("type").and_then(Value::as_str) else {
            warn!("dropping frame without type tag");
            return;
        };
        let frame_type = frame_type.to_string();
        let _ = self.dispatcher.emit(&frame_type, &value);
    }
}

/// Delay before the Nth reconnect attempt (1-indexed): `N × unit`.
fn backoff_delay(attempt: u32, unit: Duration) -> Duration {
    unit * attempt
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_linear_and_strictly_increasing() {
        let unit = Duration::from_millis(100);
        let delays: Vec<Duration> = (1..=5).map(|n| backoff_delay(n, unit)).collect();
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[4], Duration::from_millis(500));
        for pair in delays.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[tokio::test]
    async fn starts_disconnected_and_unbound() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let manager = ConnectionManager::new("ws://127.0.0.1:1/api/ws", dispatcher);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.session_id().is_none());
        assert_eq!(manager.attempts(), 0);
    }

    #[tokio::test]
    async fn send_without_connection_is_noop() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let manager = ConnectionManager::new("ws://127.0.0.1:1/api/ws", dispatcher);
        let sent = manager.send(&ClientFrame::Chat {
            message: "hello".into(),
        });
        assert!(!sent);
    }

    #[tokio::test]
    async fn disconnect_clears_binding_immediately() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let manager = ConnectionManager::with_options(
            "ws://127.0.0.1:1/api/ws",
            dispatcher,
            ConnectionOptions {
                backoff_unit: Duration::from_millis(10),
                max_attempts: 5,
            },
        );
        manager.connect("s1");
        assert_eq!(manager.session_id().as_deref(), Some("s1"));
        manager.disconnect();
        assert!(manager.session_id().is_none());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn rebinding_replaces_session() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let manager = ConnectionManager::with_options(
            "ws://127.0.0.1:1/api/ws",
            dispatcher,
            ConnectionOptions {
                backoff_unit: Duration::from_millis(10),
                max_attempts: 1,
            },
        );
        manager.connect("s1");
        manager.connect("s2");
        assert_eq!(manager.session_id().as_deref(), Some("s2"));
        manager.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let dispatcher = Arc::new(EventDispatcher::new());
        // Port 1 refuses connections immediately
        let manager = ConnectionManager::with_options(
            "ws://127.0.0.1:1/api/ws",
            dispatcher,
            ConnectionOptions {
                backoff_unit: Duration::from_millis(50),
                max_attempts: 5,
            },
        );
        manager.connect("s1");

        // Paused time auto-advances through the backoff sleeps; poll until
        // the run loop settles.
        for _ in 0..200 {
            if manager.state() == ConnectionState::Disconnected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        // Still bound: an explicit connect() is required to retry, but the
        // manager no longer retries on its own.
        assert_eq!(manager.session_id().as_deref(), Some("s1"));
        let settled = manager.attempts();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(manager.attempts(), settled);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_connect_resets_the_retry_budget() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let manager = ConnectionManager::with_options(
            "ws://127.0.0.1:1/api/ws",
            dispatcher,
            ConnectionOptions {
                backoff_unit: Duration::from_millis(10),
                max_attempts: 2,
            },
        );
        manager.connect("s1");
        for _ in 0..200 {
            if manager.state() == ConnectionState::Disconnected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.connect("s1");
        assert_ne!(manager.state(), ConnectionState::Disconnected);
        manager.disconnect();
    }
}
