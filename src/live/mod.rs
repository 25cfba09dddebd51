//! Live conversational session with a streaming speech model.
//!
//! # Architecture
//!
//! ```text
//!  hotkey / front-end
//!        │ start() / stop()
//!        ▼
//!  LiveSessionController ──▶ LiveTransport (websocket)
//!        │                        │ TransportEvent
//!        ├── capture pipeline ────┘ (outbound PCM blocks)
//!        └── PlaybackScheduler ◀─── inbound audio chunks
//! ```
//!
//! [`LiveStatus`] is the observable snapshot; [`LiveEvent`]s report each
//! change as it happens.

pub mod controller;
pub mod error;
pub mod protocol;
pub mod state;
pub mod transport;
pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::LiveSessionController;
pub use error::LiveError;
pub use protocol::{parse_server_message, ClientMessage, MediaBlob, ServerEvent, SessionSetup};
pub use state::{LiveEvent, LiveSessionState, LiveStatus, SharedStatus};
pub use transport::{LiveConnection, LiveTransport, TransportError, TransportEvent};
pub use websocket::WebSocketTransport;
