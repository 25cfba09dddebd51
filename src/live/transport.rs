//! Transport seam between the controller and the streaming endpoint.
//!
//! A [`LiveTransport`] performs the connection handshake and hands back a
//! [`LiveConnection`]: a bounded sender for outbound frames and a receiver of
//! [`TransportEvent`]s.  Dropping the outbound sender closes the connection.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::live::protocol::{ClientMessage, ServerEvent, SessionSetup};

/// Lifecycle and content events from an open connection, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The server acknowledged the session setup.
    Open,
    Server(ServerEvent),
    /// The connection failed; no further events follow.
    Error(String),
    /// The server closed the connection, with its reason if it sent one.
    Closed(Option<String>),
}

/// Both halves of one streaming connection.
pub struct LiveConnection {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub events: mpsc::Receiver<TransportEvent>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no API key configured")]
    MissingApiKey,

    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),
}

#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Connect and send `setup`.  The returned connection reports
    /// [`TransportEvent::Open`] once the server acknowledges it.
    async fn connect(&self, setup: &SessionSetup) -> Result<LiveConnection, TransportError>;
}
