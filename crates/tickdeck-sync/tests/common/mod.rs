/*
[INPUT]:  Test scenarios needing sockets, REST mocks and listeners
[OUTPUT]: Scripted socket connector, channel listeners, local servers, fixtures
[POS]:    Test infrastructure - shared across all sync test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for tickdeck-sync tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tickdeck_adapter::{AdapterError, WsSession};
use tickdeck_sync::{ConnectionManager, ConnectionState, Listener, SocketConnector, SyncError};

pub const WAIT: Duration = Duration::from_secs(120);

/// In-process connection handed out by `ScriptedConnector`.
#[derive(Debug)]
pub struct ScriptedSocket {
    pub url: String,
    frames: Option<mpsc::Sender<String>>,
    pub closed: CancellationToken,
}

impl ScriptedSocket {
    pub async fn send(&self, message: Value) {
        self.send_raw(&message.to_string()).await;
    }

    pub async fn send_raw(&self, raw: &str) {
        if let Some(frames) = &self.frames {
            frames.send(raw.to_string()).await.expect("session alive");
        }
    }

    /// Server-side close: the session ends as if the peer went away.
    pub fn hang_up(&mut self) {
        self.frames.take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Socket connector whose connections are driven by the test.
pub struct ScriptedConnector {
    refuse_all: AtomicBool,
    refuse_next: AtomicUsize,
    attempts: Mutex<Vec<Instant>>,
    sockets: mpsc::UnboundedSender<ScriptedSocket>,
}

impl ScriptedConnector {
    pub fn accepting() -> (Arc<Self>, mpsc::UnboundedReceiver<ScriptedSocket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            refuse_all: AtomicBool::new(false),
            refuse_next: AtomicUsize::new(0),
            attempts: Mutex::new(Vec::new()),
            sockets: tx,
        });
        (connector, rx)
    }

    pub fn refusing() -> (Arc<Self>, mpsc::UnboundedReceiver<ScriptedSocket>) {
        let (connector, rx) = Self::accepting();
        connector.refuse_all.store(true, Ordering::SeqCst);
        (connector, rx)
    }

    pub fn refuse_next(&self, count: usize) {
        self.refuse_next.store(count, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl SocketConnector for ScriptedConnector {
    async fn connect(&self, url: &str) -> tickdeck_adapter::Result<WsSession> {
        self.attempts.lock().push(Instant::now());

        if self.refuse_all.load(Ordering::SeqCst) {
            return Err(AdapterError::WebSocket("connection refused".into()));
        }
        let refused = self
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(AdapterError::WebSocket("connection refused".into()));
        }

        let (frames_tx, frames_rx) = mpsc::channel(64);
        let closed = CancellationToken::new();
        let _ = self.sockets.send(ScriptedSocket {
            url: url.to_string(),
            frames: Some(frames_tx),
            closed: closed.clone(),
        });
        Ok(WsSession::new(frames_rx, closed))
    }
}

pub async fn next_socket(sockets: &mut mpsc::UnboundedReceiver<ScriptedSocket>) -> ScriptedSocket {
    tokio::time::timeout(WAIT, sockets.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

/// Listener forwarding every message into a channel.
pub fn channel_listener() -> (Listener, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener: Listener = Arc::new(move |message: &Value| -> Result<(), SyncError> {
        let _ = tx.send(message.clone());
        Ok(())
    });
    (listener, rx)
}

pub fn noop_listener() -> Listener {
    Arc::new(|_: &Value| -> Result<(), SyncError> { Ok(()) })
}

pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("channel closed")
}

pub async fn wait_for_state<F>(manager: &ConnectionManager, key: &str, mut predicate: F) -> ConnectionState
where
    F: FnMut(&ConnectionState) -> bool,
{
    let mut state = manager.watch_state(key).expect("subscription exists");
    let reached = tokio::time::timeout(WAIT, state.wait_for(|current| predicate(current)))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
    *reached
}

pub fn kline_message(open_time_ms: i64, close: &str) -> Value {
    json!({
        "e": "kline",
        "E": open_time_ms + 1,
        "s": "BTCUSDT",
        "k": {
            "t": open_time_ms,
            "T": open_time_ms + 59_999,
            "i": "1m",
            "o": "100.0",
            "h": "101.0",
            "l": "99.0",
            "c": close,
            "x": false
        }
    })
}

pub fn depth_message(bids: &[(&str, &str)], asks: &[(&str, &str)]) -> Value {
    json!({
        "e": "depthUpdate",
        "E": 1_700_000_000_000_i64,
        "s": "BTCUSDT",
        "b": bids.iter().map(|(p, q)| json!([p, q])).collect::<Vec<_>>(),
        "a": asks.iter().map(|(p, q)| json!([p, q])).collect::<Vec<_>>(),
    })
}

pub fn trade_message(id: u64, price: &str, buyer_is_maker: bool) -> Value {
    json!({
        "e": "trade",
        "E": 1_700_000_000_001_i64,
        "s": "BTCUSDT",
        "t": id,
        "p": price,
        "q": "0.5",
        "T": 1_700_000_000_000_i64 + id as i64,
        "m": buyer_is_maker
    })
}

/// Raw klines body with three rows, out of order on purpose
pub fn sample_klines_body() -> Value {
    json!([
        [1_700_000_060_000_i64, "100.2", "100.8", "100.1", "100.5", "2.4", 1_700_000_119_999_i64],
        [1_700_000_000_000_i64, "100.0", "100.6", "99.8", "100.2", "1.2", 1_700_000_059_999_i64],
        [1_700_000_120_000_i64, "100.5", "101.0", "100.4", "100.9", "3.1", 1_700_000_179_999_i64]
    ])
}

/// REST mock serving `sample_klines_body` on `/api/v3/klines`
pub async fn klines_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sample_klines_body()))
        .mount(&server)
        .await;
    server
}

/// Accept one WebSocket client, send `frames`, then wait for the client to
/// close. Resolves to `true` when a close frame was observed.
pub async fn spawn_ws_server(frames: Vec<Value>) -> (String, JoinHandle<bool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream).await.expect("handshake");
        for frame in frames {
            ws.send(Message::Text(frame.to_string().into())).await.expect("send");
        }
        while let Some(message) = ws.next().await {
            match message {
                Ok(Message::Close(_)) => return true,
                Ok(_) => {}
                Err(_) => return false,
            }
        }
        false
    });

    (format!("ws://{addr}/ws"), handle)
}

/// Accept any number of WebSocket clients and send `frames` to each of them.
///
/// The counter tracks clients that closed with a close frame.
pub async fn spawn_broadcast_ws_server(frames: Vec<Value>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let closes = Arc::new(AtomicUsize::new(0));
    let closes_seen = closes.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let frames = frames.clone();
            let closes = closes_seen.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                for frame in frames {
                    if ws.send(Message::Text(frame.to_string().into())).await.is_err() {
                        return;
                    }
                }
                while let Some(message) = ws.next().await {
                    match message {
                        Ok(Message::Close(_)) => {
                            closes.fetch_add(1, Ordering::SeqCst);
                            return;
                        }
                        Ok(_) => {}
                        Err(_) => return,
                    }
                }
            });
        }
    });

    (format!("ws://{addr}/ws"), closes)
}
