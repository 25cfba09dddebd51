//! Speaker output via `cpal`.
//!
//! The output stream's callback pulls from a [`Mixer`]: every started
//! segment is a voice with an absolute start frame, and the number of frames
//! rendered so far is the device clock the scheduler reads.  When a voice
//! plays its last frame its [`SegmentId`] is sent on the finished channel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::capture::{open_on_device_thread, DeviceThreadError, StreamHandle};
use crate::audio::resample::resample_linear;
use crate::codec::DecodedSegment;
use crate::playback::scheduler::{AudioOutput, OutputDevice, SegmentId};

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

/// Errors that can occur while opening the speaker.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("output device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to enumerate output devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("unsupported output sample format: {0:?}")]
    UnsupportedFormat(cpal::SampleFormat),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error(transparent)]
    Thread(#[from] DeviceThreadError),
}

// ---------------------------------------------------------------------------
// Mixer
// ---------------------------------------------------------------------------

struct Voice {
    id: SegmentId,
    start_frame: u64,
    /// Mono samples at the mixer's rate.
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sums scheduled voices into an interleaved output buffer.
pub struct Mixer {
    sample_rate: u32,
    position: u64,
    voices: Vec<Voice>,
    finished: mpsc::UnboundedSender<SegmentId>,
}

impl Mixer {
    pub fn new(sample_rate: u32, finished: mpsc::UnboundedSender<SegmentId>) -> Self {
        Self {
            sample_rate,
            position: 0,
            voices: Vec::new(),
            finished,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames rendered since creation.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Device clock in seconds.
    pub fn current_time(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.position as f64 / self.sample_rate as f64
    }

    /// Add a mono voice starting at `start_frame`.  A start frame that has
    /// already been rendered is moved up to the current position.
    pub fn add(&mut self, id: SegmentId, start_frame: u64, samples: Vec<f32>) {
        self.voices.push(Voice {
            id,
            start_frame: start_frame.max(self.position),
            samples,
        });
    }

    /// Drop a voice without reporting it finished.
    pub fn remove(&mut self, id: SegmentId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.id != id);
        self.voices.len() != before
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Fill `out` (interleaved, `channels` wide) and advance the clock.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        let channels = channels.max(1);
        let frames = (out.len() / channels) as u64;
        let window_start = self.position;
        let window_end = window_start + frames;

        for voice in &self.voices {
            let from = voice.start_frame.max(window_start);
            let to = voice.end_frame().min(window_end);
            for frame in from..to {
                let sample = voice.samples[(frame - voice.start_frame) as usize];
                let base = (frame - window_start) as usize * channels;
                for slot in &mut out[base..base + channels] {
                    *slot += sample;
                }
            }
        }
        for s in out.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }

        self.position = window_end;

        let finished = &self.finished;
        self.voices.retain(|v| {
            if v.end_frame() <= window_end {
                let _ = finished.send(v.id);
                false
            } else {
                true
            }
        });
    }
}

fn lock_mixer(mixer: &Mutex<Mixer>) -> MutexGuard<'_, Mixer> {
    mixer.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// MixerOutput
// ---------------------------------------------------------------------------

/// [`AudioOutput`] backed by a shared [`Mixer`].
///
/// Holds the device stream alive; dropping it releases the speaker.
pub struct MixerOutput {
    mixer: Arc<Mutex<Mixer>>,
    _stream: Option<StreamHandle>,
}

impl MixerOutput {
    pub fn new(mixer: Arc<Mutex<Mixer>>, stream: Option<StreamHandle>) -> Self {
        Self {
            mixer,
            _stream: stream,
        }
    }
}

impl AudioOutput for MixerOutput {
    fn current_time(&self) -> f64 {
        lock_mixer(&self.mixer).current_time()
    }

    fn start_segment(&mut self, id: SegmentId, at: f64, segment: &DecodedSegment) {
        let mut mixer = lock_mixer(&self.mixer);
        let rate = mixer.sample_rate();
        let mono = segment.to_mono();
        let samples = resample_linear(&mono, segment.sample_rate, rate);
        let start_frame = (at.max(0.0) * rate as f64).round() as u64;
        mixer.add(id, start_frame, samples);
    }

    fn stop_segment(&mut self, id: SegmentId) {
        lock_mixer(&self.mixer).remove(id);
    }
}

// ---------------------------------------------------------------------------
// CpalOutput
// ---------------------------------------------------------------------------

/// Speaker playback built on top of `cpal`.
#[derive(Debug, Clone, Default)]
pub struct CpalOutput {
    device_name: Option<String>,
}

impl CpalOutput {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

#[async_trait]
impl OutputDevice for CpalOutput {
    async fn open(
        &self,
        finished: mpsc::UnboundedSender<SegmentId>,
    ) -> Result<Box<dyn AudioOutput>, PlaybackError> {
        let device_name = self.device_name.clone();
        let ((mixer, channels), handle) = open_on_device_thread("speaker-playback", move || {
            open_output_stream(device_name, finished)
        })
        .await?;

        log::info!(
            "playback: speaker open ({} Hz, {channels} ch)",
            lock_mixer(&mixer).sample_rate()
        );
        Ok(Box::new(MixerOutput::new(mixer, Some(handle))))
    }
}

fn find_output_device(name: Option<&str>) -> Result<cpal::Device, PlaybackError> {
    let host = cpal::default_host();
    match name {
        None => host.default_output_device().ok_or(PlaybackError::NoDevice),
        Some(wanted) => host
            .output_devices()?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| PlaybackError::DeviceNotFound(wanted.to_string())),
    }
}

fn open_output_stream(
    device_name: Option<String>,
    finished: mpsc::UnboundedSender<SegmentId>,
) -> Result<(cpal::Stream, (Arc<Mutex<Mixer>>, u16)), PlaybackError> {
    let device = find_output_device(device_name.as_deref())?;
    let supported = device.default_output_config()?;
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let mixer = Arc::new(Mutex::new(Mixer::new(config.sample_rate.0, finished)));

    let stream = match format {
        cpal::SampleFormat::F32 => build_output::<f32>(&device, &config, Arc::clone(&mixer))?,
        cpal::SampleFormat::I16 => build_output::<i16>(&device, &config, Arc::clone(&mixer))?,
        cpal::SampleFormat::U16 => build_output::<u16>(&device, &config, Arc::clone(&mixer))?,
        other => return Err(PlaybackError::UnsupportedFormat(other)),
    };
    stream.play()?;
    Ok((stream, (mixer, config.channels)))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len(), 0.0);
            lock_mixer(&mixer).render(&mut scratch, channels);
            for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                *dst = T::from_sample(src);
            }
        },
        |err: cpal::StreamError| {
            log::error!("cpal output stream error: {err}");
        },
        None,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
