//! PCM16 wire codec for the live audio stream.
//!
//! # Formats
//!
//! | Direction | Rate     | Layout                                   |
//! |-----------|----------|------------------------------------------|
//! | Outbound  | 16 kHz   | mono, signed 16-bit little-endian        |
//! | Inbound   | 24 kHz   | mono, signed 16-bit little-endian, base64 |
//!
//! ```text
//! AudioFrame (f32) ──encode_frame──▶ EncodedBlob (bytes + mime tag) ──▶ transport
//! transport ──▶ base64 payload ──decode_base64_pcm16──▶ DecodedSegment (f32)
//! ```
//!
//! # Example
//!
//! ```rust
//! use sobjanta_live::codec::{decode_pcm16, encode_frame, AudioFrame};
//!
//! let frame = AudioFrame::new(vec![0.0, 0.5, -0.5], 16_000);
//! let blob = encode_frame(&frame);
//! assert_eq!(blob.data.len(), 6);
//! assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
//!
//! let segment = decode_pcm16(&blob.data, 16_000, 1).unwrap();
//! assert_eq!(segment.frames(), 3);
//! ```

pub mod decoder;
pub mod encoder;

pub use decoder::{decode_base64_pcm16, decode_pcm16, DecodeError, DecodedSegment};
pub use encoder::{encode_frame, encode_pcm16, pcm_mime_type, AudioFrame, EncodedBlob};

/// Sample rate of audio sent to the streaming endpoint.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of audio received from the streaming endpoint.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
