//! Minimal Chrome DevTools Protocol client over WebSocket.
//!
//! Commands carry an incrementing id; a background reader routes each
//! response to the oneshot registered under that id and fans events out on
//! a broadcast channel so several listeners can watch the same page.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::CdpError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<CdpResponse>>>>;

/// Default time a command waits for its response.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Serialize)]
struct CdpCommand<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug)]
struct CdpResponse {
    result: Option<Value>,
    error: Option<CdpResponseError>,
}

#[derive(Debug, Deserialize)]
struct CdpResponseError {
    code: i64,
    message: String,
}

pub struct CdpClient {
    next_id: AtomicU64,
    pending: Pending,
    writer: Mutex<WsSink>,
    events: broadcast::Sender<CdpEvent>,
    closed: Arc<watch::Sender<bool>>,
    reader: JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a DevTools WebSocket endpoint, e.g.
    /// `ws://127.0.0.1:9222/devtools/page/<id>`.
    ///
    /// # Errors
    ///
    /// Returns [`CdpError::WebSocket`] if the handshake fails.
    pub async fn connect(ws_url: &str) -> Result<Self, CdpError> {
        let (stream, _) = tokio_tungstenite::connect_async(ws_url).await?;
        tracing::debug!(ws_url, "connected to DevTools");
        let (writer, reader) = stream.split();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let closed = Arc::new(watch::Sender::new(false));

        let reader = tokio::spawn(read_loop(
            reader,
            Arc::clone(&pending),
            events.clone(),
            Arc::clone(&closed),
        ));

        Ok(Self {
            next_id: AtomicU64::new(1),
            pending,
            writer: Mutex::new(writer),
            events,
            closed,
            reader,
        })
    }

    /// Events received from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection is gone.
    pub async fn wait_closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// # Errors
    ///
    /// See [`CdpClient::send_command_with_timeout`].
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, CdpError> {
        self.send_command_with_timeout(method, params, DEFAULT_COMMAND_TIMEOUT)
            .await
    }

    /// Send `method` and wait for its result.
    ///
    /// # Errors
    ///
    /// [`CdpError::Closed`] if the connection is gone or drops before the
    /// response, [`CdpError::Timeout`] if none arrives in time, and
    /// [`CdpError::Remote`] for protocol-level failures.
    pub async fn send_command_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, CdpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let json = serde_json::to_string(&CdpCommand { id, method, params })?;

        tracing::trace!(id, method, "sending CDP command");

        let (tx, rx) = oneshot::channel();
        {
            // The reader marks the connection closed before it clears
            // `pending`, so checking under the lock cannot strand a waiter.
            let mut pending = self.pending.lock().await;
            if self.is_closed() {
                return Err(CdpError::Closed);
            }
            pending.insert(id, tx);
        }

        let sent = self.writer.lock().await.send(Message::Text(json.into())).await;
        if let Err(err) = sent {
            self.pending.lock().await.remove(&id);
            return Err(err.into());
        }

        let Ok(response) = tokio::time::timeout(timeout, rx).await else {
            self.pending.lock().await.remove(&id);
            return Err(CdpError::Timeout {
                method: method.to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            });
        };
        let response = response.map_err(|_| CdpError::Closed)?;

        if let Some(err) = response.error {
            return Err(CdpError::Remote {
                code: err.code,
                message: err.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Send a WebSocket close frame. Pending and later commands fail with
    /// [`CdpError::Closed`].
    pub async fn close(&self) {
        self.closed.send_replace(true);
        if let Err(err) = self.writer.lock().await.close().await {
            tracing::debug!(error = %err, "DevTools socket already closed");
        }
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    mut reader: SplitStream<WsStream>,
    pending: Pending,
    events: broadcast::Sender<CdpEvent>,
    closed: Arc<watch::Sender<bool>>,
) {
    while let Some(message) = reader.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => {
                tracing::debug!("DevTools socket closed by browser");
                break;
            }
            Ok(_) => continue,
            Err(err) => {
                tracing::warn!(error = %err, "DevTools socket read failed");
                break;
            }
        };

        let json: Value = match serde_json::from_str(&text) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(error = %err, "unparseable DevTools message");
                continue;
            }
        };

        if let Some(id) = json.get("id").and_then(Value::as_u64) {
            let response = CdpResponse {
                result: json.get("result").cloned(),
                error: json
                    .get("error")
                    .and_then(|e| serde_json::from_value(e.clone()).ok()),
            };
            match pending.lock().await.remove(&id) {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => tracing::debug!(id, "response for unknown CDP command"),
            }
        } else if let Some(method) = json.get("method").and_then(Value::as_str) {
            let _ = events.send(CdpEvent {
                method: method.to_string(),
                params: json.get("params").cloned().unwrap_or(Value::Null),
            });
        }
    }

    closed.send_replace(true);
    // Dropping the senders fails every waiting command with `Closed`.
    pending.lock().await.clear();
}
