/*
[INPUT]:  Test configuration and mock server requirements
[OUTPUT]: Shared test utilities, fixtures, and mock helpers
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for tickdeck-adapter tests

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use wiremock::MockServer;

/// Setup a mock HTTP server for testing
pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

/// Raw klines body with two rows, out of order on purpose
#[allow(dead_code)]
pub fn sample_klines_body() -> serde_json::Value {
    serde_json::json!([
        [1_700_000_060_000_i64, "100.2", "100.8", "100.1", "100.5", "2.4", 1_700_000_119_999_i64],
        [1_700_000_000_000_i64, "100.0", "100.6", "99.8", "100.2", "1.2", 1_700_000_059_999_i64]
    ])
}

/// Accept one WebSocket client, send `frames`, then close.
///
/// Returns the `ws://` URL and the server task.
#[allow(dead_code)]
pub async fn spawn_ws_server(frames: Vec<String>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream).await.expect("handshake");
        for frame in frames {
            ws.send(Message::Text(frame.into())).await.expect("send");
        }
        let _ = ws.close(None).await;

        let mut received = Vec::new();
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                received.push(text.to_string());
            }
        }
        received
    });

    (format!("ws://{addr}/ws"), handle)
}

/// Accept one WebSocket client and keep it open until the client closes.
///
/// The returned task resolves to `true` when a close frame was observed.
#[allow(dead_code)]
pub async fn spawn_idle_ws_server() -> (String, JoinHandle<bool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream).await.expect("handshake");
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
