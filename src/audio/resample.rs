//! Audio resampling and channel mixing utilities.
//!
//! Devices rarely run at the rates the streaming endpoint speaks (16 kHz in,
//! 24 kHz out), so this module provides:
//!
//! 1. [`stereo_to_mono`] — downmix any number of interleaved channels to mono.
//! 2. [`resample_linear`] — one-shot linear interpolation between two rates,
//!    used for whole playback segments.
//! 3. [`StreamResampler`] — a stateful `rubato` FFT resampler for the
//!    continuous microphone stream, where chunk boundaries must not click.

use rubato::{FftFixedIn, Resampler};

/// Input frames per `rubato` processing call.
const STREAM_CHUNK_FRAMES: usize = 1024;

// ---------------------------------------------------------------------------
// stereo_to_mono
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging all channels.
///
/// The output length is `samples.len() / channels`.
///
/// * If `channels == 1` the input slice is returned as an owned `Vec`.
/// * If `channels == 0` an empty vector is returned.
///
/// # Example
///
/// ```rust
/// use sobjanta_live::audio::stereo_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, -0.2]; // L R L R
/// let mono = stereo_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[0] - 0.0).abs() < 1e-6);
/// ```
pub fn stereo_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// resample_linear
// ---------------------------------------------------------------------------

/// Resample mono `samples` from `source_rate` to `target_rate` Hz using
/// linear interpolation.
///
/// * Equal rates return a copy of the input.
/// * Empty input or a zero rate returns an empty vector.
///
/// The output length is `ceil(samples.len() * target_rate / source_rate)`.
///
/// ```rust
/// use sobjanta_live::audio::resample_linear;
///
/// // 24 kHz model audio played on a 48 kHz device
/// let out = resample_linear(&vec![0.5_f32; 240], 24_000, 48_000);
/// assert_eq!(out.len(), 480);
/// ```
pub fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }
    if samples.is_empty() || source_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else if idx < samples.len() {
            samples[idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

// ---------------------------------------------------------------------------
// StreamResampler
// ---------------------------------------------------------------------------

enum Mode {
    Passthrough,
    Fft {
        resampler: Box<FftFixedIn<f32>>,
        pending: Vec<f32>,
    },
    /// Used only when `rubato` rejects the rate pair.
    Linear,
}

/// Stateful mono resampler for a continuous stream of arbitrarily sized
/// chunks.
///
/// Input is buffered until `rubato` has a full processing chunk, so output
/// lags input by up to one chunk plus the filter delay.
pub struct StreamResampler {
    source_rate: u32,
    target_rate: u32,
    mode: Mode,
}

impl StreamResampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        let mode = if source_rate == target_rate {
            Mode::Passthrough
        } else {
            match FftFixedIn::<f32>::new(
                source_rate as usize,
                target_rate as usize,
                STREAM_CHUNK_FRAMES,
                2,
                1,
            ) {
                Ok(resampler) => Mode::Fft {
                    resampler: Box::new(resampler),
                    pending: Vec::with_capacity(STREAM_CHUNK_FRAMES * 2),
                },
                Err(e) => {
                    log::warn!(
                        "resample: rubato rejected {source_rate}→{target_rate} Hz ({e}), using linear"
                    );
                    Mode::Linear
                }
            }
        };

        Self {
            source_rate,
            target_rate,
            mode,
        }
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Feed mono `samples` and return whatever output is ready.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        match &mut self.mode {
            Mode::Passthrough => samples.to_vec(),
            Mode::Linear => resample_linear(samples, self.source_rate, self.target_rate),
            Mode::Fft { resampler, pending } => {
                pending.extend_from_slice(samples);
                let mut out = Vec::new();
                loop {
                    let needed = resampler.input_frames_next();
                    if pending.len() < needed {
                        break;
                    }
                    let chunk: Vec<f32> = pending.drain(..needed).collect();
                    match resampler.process(&[chunk], None) {
                        Ok(mut channels) => {
                            if let Some(mono) = channels.pop() {
                                out.extend(mono);
                            }
                        }
                        Err(e) => {
                            log::warn!("resample: dropping chunk after rubato error: {e}");
                            break;
                        }
                    }
                }
                out
            }
        }
    }

    /// Discard buffered input and filter state.
    pub fn reset(&mut self) {
        if let Mode::Fft { resampler, pending } = &mut self.mode {
            resampler.reset();
            pending.clear();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
