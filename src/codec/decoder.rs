//! Base64 PCM16 → `f32` decoder for inbound model audio.

use base64::Engine;
use thiserror::Error;

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// A malformed inbound audio payload.
///
/// Decode errors are per-chunk: the offending chunk is dropped and the live
/// session carries on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("PCM16 payload of {len} bytes is not a whole number of {channels}-channel frames")]
    Misaligned { len: usize, channels: u16 },

    #[error("channel count must be at least 1")]
    ZeroChannels,
}

// ---------------------------------------------------------------------------
// DecodedSegment
// ---------------------------------------------------------------------------

/// A playable block of `f32` audio reconstructed from one inbound chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSegment {
    /// Interleaved samples in `[-1.0, 1.0)`.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedSegment {
    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        match self.channels {
            0 => 0,
            n => self.samples.len() / n as usize,
        }
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// De-interleaved samples of channel `index`.
    pub fn channel(&self, index: u16) -> Vec<f32> {
        if index >= self.channels {
            return Vec::new();
        }
        self.samples
            .iter()
            .skip(index as usize)
            .step_by(self.channels as usize)
            .copied()
            .collect()
    }

    /// Average all channels down to a single mono track.
    pub fn to_mono(&self) -> Vec<f32> {
        crate::audio::stereo_to_mono(&self.samples, self.channels)
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Reinterpret `bytes` as signed 16-bit little-endian PCM with `channels`
/// interleaved channels and rescale each sample to `f32` (`i16 / 32768`).
///
/// # Errors
///
/// [`DecodeError::Misaligned`] when `bytes.len()` is not a multiple of
/// `2 × channels`; [`DecodeError::ZeroChannels`] when `channels == 0`.
pub fn decode_pcm16(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<DecodedSegment, DecodeError> {
    if channels == 0 {
        return Err(DecodeError::ZeroChannels);
    }
    let frame_bytes = 2 * channels as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(DecodeError::Misaligned {
            len: bytes.len(),
            channels,
        });
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();

    Ok(DecodedSegment {
        samples,
        sample_rate,
        channels,
    })
}

/// Base64-decode `payload` and then [`decode_pcm16`] it.
pub fn decode_base64_pcm16(
    payload: &str,
    sample_rate: u32,
    channels: u16,
) -> Result<DecodedSegment, DecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(payload.trim())?;
    decode_pcm16(&bytes, sample_rate, channels)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
