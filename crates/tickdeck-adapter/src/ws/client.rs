/*
[INPUT]:  Stream endpoint URL
[OUTPUT]: One physical WebSocket as a session of text frames with explicit close
[POS]:    WebSocket layer - real-time data stream handling
[UPDATE]: When changing frame handling or connection teardown
*/

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::http::client::truncate_for_log;
use crate::http::{AdapterError, Result};

/// Default stream base for public market data
pub const DEFAULT_WS_BASE_URL: &str = "wss://stream.binance.com:9443/ws";

const FRAME_BUFFER: usize = 256;
const FRAME_SAMPLE_LIMIT: usize = 3;
const RAW_LOG_MAX_BYTES: usize = 1024;

static FRAME_SAMPLE_COUNT: AtomicUsize = AtomicUsize::new(0);

/// A live WebSocket connection seen as a stream of text frames.
///
/// `next_frame` yields `None` once the peer closes, the transport errors, or
/// `close` is called. Dropping the session closes the socket.
#[derive(Debug)]
pub struct WsSession {
    frames: mpsc::Receiver<String>,
    shutdown: CancellationToken,
}

impl WsSession {
    /// Build a session from an existing frame channel (custom transports, tests).
    pub fn new(frames: mpsc::Receiver<String>, shutdown: CancellationToken) -> Self {
        Self { frames, shutdown }
    }

    /// Open a physical connection and spawn its I/O task
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|err| AdapterError::WebSocket(err.to_string()))?;
        let (mut write, mut read) = ws_stream.split();
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_BUFFER);
        let shutdown = CancellationToken::new();
        let shutdown_for_task = shutdown.clone();
        let url_for_task = url.to_string();

        info!(url, "ws connected");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_for_task.cancelled() => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        break;
                    }
                    incoming = read.next() => {
                        match incoming {
                            Some(Ok(WsMessage::Text(text))) => {
                                log_frame_sample_once(text.as_str());
                                if frame_tx.send(text.to_string()).await.is_err() {
                                    let _ = write.send(WsMessage::Close(None)).await;
                                    break;
                                }
                            }
                            Some(Ok(WsMessage::Binary(bytes))) => {
                                match String::from_utf8(bytes.to_vec()) {
                                    Ok(text) => {
                                        if frame_tx.send(text).await.is_err() {
                                            let _ = write.send(WsMessage::Close(None)).await;
                                            break;
                                        }
                                    }
                                    Err(_) => {
                                        debug!(bytes = bytes.len(), "ws binary frame is not utf-8; dropped");
                                    }
                                }
                            }
                            Some(Ok(WsMessage::Close(_))) => {
                                let _ = write.send(WsMessage::Close(None)).await;
                                break;
                            }
                            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                            Some(Ok(WsMessage::Frame(_))) => {}
                            Some(Err(err)) => {
                                debug!(url = %url_for_task, error = %err, "ws read failed");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }

            debug!(url = %url_for_task, "ws io task finished");
        });

        Ok(Self::new(frame_rx, shutdown))
    }

    /// Next text frame, or `None` once the connection is gone
    pub async fn next_frame(&mut self) -> Option<String> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            frame = self.frames.recv() => frame,
        }
    }

    /// Request the socket to close. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn log_frame_sample_once(raw: &str) {
    let count = FRAME_SAMPLE_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < FRAME_SAMPLE_LIMIT {
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = FRAME_SAMPLE_LIMIT,
            bytes = raw.len(),
            message = %preview,
            "ws frame sample"
        );
    }
}
