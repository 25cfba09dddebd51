use thiserror::Error;

use crate::audio::CaptureError;
use crate::codec::DecodeError;
use crate::live::transport::TransportError;
use crate::playback::PlaybackError;

/// Failures surfaced by the live session controller.
///
/// Device and connection errors end the session and leave the controller
/// `Idle`; decode errors only cost the offending chunk.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Microphone or speaker unavailable, or access denied.
    #[error("audio device unavailable: {0}")]
    Device(String),

    /// Handshake failed or the connection dropped.
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("malformed audio payload: {0}")]
    Decode(#[from] DecodeError),

    #[error("a live session is already active")]
    AlreadyActive,
}

impl From<CaptureError> for LiveError {
    fn from(e: CaptureError) -> Self {
        LiveError::Device(format!("microphone: {e}"))
    }
}

impl From<PlaybackError> for LiveError {
    fn from(e: PlaybackError) -> Self {
        LiveError::Device(format!("speaker: {e}"))
    }
}

impl From<TransportError> for LiveError {
    fn from(e: TransportError) -> Self {
        LiveError::Connection(e.to_string())
    }
}
