//! `f32` → PCM16 encoder for outbound microphone audio.

use base64::Engine;

// ---------------------------------------------------------------------------
// AudioFrame
// ---------------------------------------------------------------------------

/// A fixed-length block of mono `f32` samples captured from the microphone.
///
/// Frames are produced by [`crate::audio::BlockFramer`], consumed once by
/// [`encode_frame`] and then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Mono samples, nominally in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration of the frame in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

// ---------------------------------------------------------------------------
// EncodedBlob
// ---------------------------------------------------------------------------

/// Wire-ready PCM16 payload plus its MIME-style encoding tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBlob {
    /// Signed 16-bit little-endian samples.
    pub data: Vec<u8>,
    /// Encoding tag, e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
}

impl EncodedBlob {
    /// Standard base64 rendering of [`data`](Self::data) for JSON transport.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    /// Number of PCM16 samples carried by the blob.
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }
}

/// MIME-style tag for raw mono PCM16 at `sample_rate`.
///
/// ```
/// use sobjanta_live::codec::pcm_mime_type;
/// assert_eq!(pcm_mime_type(16_000), "audio/pcm;rate=16000");
/// ```
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Convert `samples` into signed 16-bit little-endian PCM bytes.
///
/// Each sample is clamped to `[-1.0, 1.0]`, scaled by `32768` (the same
/// factor the decoder divides by) and saturated to the `i16` range, so
/// `-1.0` maps to `i16::MIN`, `1.0` to `i16::MAX` and out-of-range input
/// never wraps.  `NaN` encodes as `0`.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&quantize(sample).to_le_bytes());
    }
    out
}

/// Encode one [`AudioFrame`] into an [`EncodedBlob`] tagged with the frame's
/// sample rate.
pub fn encode_frame(frame: &AudioFrame) -> EncodedBlob {
    EncodedBlob {
        data: encode_pcm16(&frame.samples),
        mime_type: pcm_mime_type(frame.sample_rate),
    }
}

fn quantize(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let scaled = (sample.clamp(-1.0, 1.0) * 32768.0).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
