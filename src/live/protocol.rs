//! JSON wire protocol of the bidirectional streaming endpoint.
//!
//! Outbound, the client sends one `setup` frame and then a stream of
//! `realtimeInput` frames, one per captured block:
//!
//! ```json
//! {"realtimeInput":{"mediaChunks":[{"mimeType":"audio/pcm;rate=16000","data":"<base64>"}]}}
//! ```
//!
//! Inbound frames are decoded into [`ServerMessage`] and flattened into
//! [`ServerEvent`]s in the order the controller applies them.

use serde::{Deserialize, Serialize};

use crate::codec::EncodedBlob;
use crate::config::LiveConfig;

// ---------------------------------------------------------------------------
// SessionSetup
// ---------------------------------------------------------------------------

/// Everything the server needs to know before the first audio block.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSetup {
    pub model: String,
    /// Prebuilt voice for spoken replies.
    pub voice_name: Option<String>,
    pub system_instruction: Option<String>,
    /// Request transcripts of both sides of the conversation.
    pub transcription: bool,
}

impl SessionSetup {
    pub fn from_config(config: &LiveConfig) -> Self {
        Self {
            model: config.model.clone(),
            voice_name: Some(config.voice_name.clone()).filter(|v| !v.is_empty()),
            system_instruction: config.system_instruction.clone(),
            transcription: config.transcription,
        }
    }
}

// ---------------------------------------------------------------------------
// ClientMessage
// ---------------------------------------------------------------------------

/// One base64 media payload, `{ data, mimeType }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String,
}

impl From<&EncodedBlob> for MediaBlob {
    fn from(blob: &EncodedBlob) -> Self {
        Self {
            mime_type: blob.mime_type.clone(),
            data: blob.to_base64(),
        }
    }
}

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Setup(SessionSetup),
    /// One captured block: `{ media: { data, mimeType } }`.
    RealtimeInput(MediaBlob),
}

impl ClientMessage {
    pub fn audio(blob: &EncodedBlob) -> Self {
        ClientMessage::RealtimeInput(MediaBlob::from(blob))
    }

    /// Render as the JSON text frame sent on the socket.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let frame = match self {
            ClientMessage::Setup(setup) => WireClientMessage {
                setup: Some(WireSetup::from(setup)),
                realtime_input: None,
            },
            ClientMessage::RealtimeInput(media) => WireClientMessage {
                setup: None,
                realtime_input: Some(WireRealtimeInput {
                    media_chunks: vec![media.clone()],
                }),
            },
        };
        serde_json::to_string(&frame)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireClientMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    setup: Option<WireSetup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    realtime_input: Option<WireRealtimeInput>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRealtimeInput {
    media_chunks: Vec<MediaBlob>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireSetup {
    model: String,
    generation_config: WireGenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<Empty>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    response_modalities: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<WireSpeechConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireSpeechConfig {
    voice_config: WireVoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireVoiceConfig {
    prebuilt_voice_config: WirePrebuiltVoice,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WirePrebuiltVoice {
    voice_name: String,
}

#[derive(Serialize)]
struct WireContent {
    parts: Vec<WireTextPart>,
}

#[derive(Serialize)]
struct WireTextPart {
    text: String,
}

#[derive(Serialize)]
struct Empty {}

impl From<&SessionSetup> for WireSetup {
    fn from(setup: &SessionSetup) -> Self {
        let speech_config = setup.voice_name.as_ref().map(|voice| WireSpeechConfig {
            voice_config: WireVoiceConfig {
                prebuilt_voice_config: WirePrebuiltVoice {
                    voice_name: voice.clone(),
                },
            },
        });
        Self {
            model: setup.model.clone(),
            generation_config: WireGenerationConfig {
                response_modalities: vec!["AUDIO"],
                speech_config,
            },
            system_instruction: setup.system_instruction.as_ref().map(|text| WireContent {
                parts: vec![WireTextPart { text: text.clone() }],
            }),
            input_audio_transcription: setup.transcription.then_some(Empty {}),
            output_audio_transcription: setup.transcription.then_some(Empty {}),
        }
    }
}

// ---------------------------------------------------------------------------
// ServerMessage
// ---------------------------------------------------------------------------

/// Typed view of one inbound frame.  Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub inline_data: Option<InlineData>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

// ---------------------------------------------------------------------------
// ServerEvent
// ---------------------------------------------------------------------------

/// Control-relevant content of an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    /// Base64 PCM16; `sample_rate` comes from the part's MIME type if present.
    Audio {
        data: String,
        sample_rate: Option<u32>,
    },
    Interrupted,
    InputTranscript(String),
    OutputTranscript(String),
    TurnComplete,
    /// The server will close the connection soon.
    GoAway { time_left: Option<String> },
}

impl ServerMessage {
    /// Flatten into events: setup, audio parts in order, interruption,
    /// transcripts, turn completion, go-away.
    pub fn into_events(self) -> Vec<ServerEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(ServerEvent::SetupComplete);
        }

        if let Some(content) = self.server_content {
            let parts = content.model_turn.map(|t| t.parts).unwrap_or_default();
            for part in parts {
                let Some(inline) = part.inline_data else {
                    continue;
                };
                let mime = inline.mime_type.as_deref().unwrap_or("audio/pcm");
                if !mime.starts_with("audio/pcm") {
                    log::debug!("live: skipping non-PCM inline data ({mime})");
                    continue;
                }
                events.push(ServerEvent::Audio {
                    sample_rate: parse_pcm_rate(mime),
                    data: inline.data,
                });
            }
            if content.interrupted {
                events.push(ServerEvent::Interrupted);
            }
            if let Some(text) = content.input_transcription.and_then(|t| t.text) {
                events.push(ServerEvent::InputTranscript(text));
            }
            if let Some(text) = content.output_transcription.and_then(|t| t.text) {
                events.push(ServerEvent::OutputTranscript(text));
            }
            if content.turn_complete {
                events.push(ServerEvent::TurnComplete);
            }
        }

        if let Some(go_away) = self.go_away {
            events.push(ServerEvent::GoAway {
                time_left: go_away.time_left,
            });
        }

        events
    }
}

/// Parse one inbound text frame.
pub fn parse_server_message(text: &str) -> serde_json::Result<Vec<ServerEvent>> {
    let message: ServerMessage = serde_json::from_str(text)?;
    Ok(message.into_events())
}

/// Extract `rate=N` from a MIME type such as `audio/pcm;rate=24000`.
pub fn parse_pcm_rate(mime: &str) -> Option<u32> {
    mime.split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
