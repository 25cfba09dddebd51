//! [`LiveTransport`] over a websocket (`tokio-tungstenite`).
//!
//! ```text
//!                 ┌── writer task ◀── outbound mpsc ◀── controller
//! websocket ──────┤
//!                 └── reader task ──▶ events mpsc ──▶ controller
//! ```
//!
//! The writer sends a Close frame once every outbound sender is dropped.
//! The reader stops when the socket ends or the event receiver is dropped.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;

use crate::config::LiveConfig;
use crate::live::protocol::{parse_server_message, ClientMessage, ServerEvent, SessionSetup};
use crate::live::transport::{LiveConnection, LiveTransport, TransportError, TransportEvent};

/// Outbound frames buffered between the sender task and the socket.
const OUTBOUND_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 64;

pub struct WebSocketTransport {
    endpoint: String,
    api_key: String,
}

impl WebSocketTransport {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    /// Build from config, resolving the API key from the environment if
    /// needed.
    pub fn from_config(config: &LiveConfig) -> Result<Self, TransportError> {
        let api_key = config
            .resolve_api_key()
            .ok_or(TransportError::MissingApiKey)?;
        Ok(Self::new(config.endpoint.clone(), api_key))
    }

    /// Endpoint with the API key appended as the `key` query parameter.
    pub fn request_url(&self) -> String {
        let sep = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{sep}key={}", self.endpoint, self.api_key)
    }
}

#[async_trait]
impl LiveTransport for WebSocketTransport {
    async fn connect(&self, setup: &SessionSetup) -> Result<LiveConnection, TransportError> {
        let request = self
            .request_url()
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        let (ws, _response) = connect_async(request).await?;
        let (mut sink, mut source) = ws.split();

        let setup_frame = ClientMessage::Setup(setup.clone()).to_json()?;
        log::debug!("live: sending setup for {}", setup.model);
        sink.send(Message::Text(setup_frame)).await?;

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(OUTBOUND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(EVENT_CAPACITY);

        // ── writer ──────────────────────────────────────────────────────
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        log::warn!("live: dropping unencodable frame: {e}");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    log::warn!("live: websocket send failed: {e}");
                    return;
                }
            }
            log::debug!("live: outbound closed, sending Close frame");
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        });

        // ── reader ──────────────────────────────────────────────────────
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    frame = source.next() => frame,
                    _ = event_tx.closed() => return,
                };

                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(e) => {
                            log::warn!("live: ignoring non-UTF-8 binary frame: {e}");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty());
                        let _ = event_tx.send(TransportEvent::Closed(reason)).await;
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                        return;
                    }
                    None => {
                        let _ = event_tx.send(TransportEvent::Closed(None)).await;
                        return;
                    }
                };

                if !forward_frame(&text, &event_tx).await {
                    return;
                }
            }
        });

        Ok(LiveConnection {
            outbound: outbound_tx,
            events: event_rx,
        })
    }
}

/// Parse one text frame and forward its events.  Returns `false` once the
/// receiver is gone.
async fn forward_frame(text: &str, event_tx: &mpsc::Sender<TransportEvent>) -> bool {
    let events = match parse_server_message(text) {
        Ok(events) => events,
        Err(e) => {
            log::warn!("live: ignoring malformed server frame: {e}");
            return true;
        }
    };

    for event in events {
        let event = match event {
            ServerEvent::SetupComplete => TransportEvent::Open,
            other => TransportEvent::Server(other),
        };
        if event_tx.send(event).await.is_err() {
            return false;
        }
    }
    true
}
