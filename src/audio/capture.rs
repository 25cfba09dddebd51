//! Microphone capture via `cpal`.
//!
//! [`InputDevice`] is the seam the live controller acquires the microphone
//! through; [`CpalInput`] is the production implementation.  Acquisition
//! returns a [`StreamHandle`], a RAII guard that releases the microphone
//! when dropped, and streams [`AudioChunk`]s over an unbounded tokio channel
//! so the audio callback never blocks.
//!
//! `cpal::Stream` is not `Send` on every platform, so each stream lives on a
//! dedicated OS thread that builds it, reports readiness through a oneshot
//! and parks until the handle is dropped.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// A single buffer of raw audio as delivered by the cpal callback.
///
/// Samples are interleaved `f32` in the range `[-1.0, 1.0]` at the device's
/// native rate; [`crate::audio::BlockFramer`] turns these into fixed-size
/// 16 kHz mono frames.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Interleaved PCM samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate of this chunk in Hz (e.g. 44100, 48000, 16000).
    pub sample_rate: u32,
    /// Number of interleaved channels (1 = mono, 2 = stereo, …).
    pub channels: u16,
}

// ---------------------------------------------------------------------------
// StreamHandle
// ---------------------------------------------------------------------------

/// RAII guard that keeps an audio device stream alive.
///
/// Dropping it releases the device.  The guard is `Send`, so it can be held
/// by the session task regardless of the platform's cpal threading rules.
pub struct StreamHandle {
    _guard: Box<dyn Send>,
}

impl StreamHandle {
    /// Wrap any value whose `Drop` releases the underlying device.
    pub fn new(guard: impl Send + 'static) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").finish_non_exhaustive()
    }
}

/// The owning thread of a cpal stream exited before reporting readiness.
#[derive(Debug, Clone, Copy, Error)]
#[error("audio device thread exited before the stream was ready")]
pub struct DeviceThreadError;

/// Keeps a device thread parked; dropping the sender wakes it so it drops
/// its stream and exits.
struct DeviceThread {
    _stop: std::sync::mpsc::Sender<()>,
}

/// Run `build` on a new OS thread that then owns the returned stream until
/// the [`StreamHandle`] is dropped.
///
/// `T` is whatever metadata the caller needs back (rate, channels, …).
pub(crate) async fn open_on_device_thread<T, E, F>(
    name: &str,
    build: F,
) -> Result<(T, StreamHandle), E>
where
    T: Send + 'static,
    E: From<DeviceThreadError> + Send + 'static,
    F: FnOnce() -> Result<(cpal::Stream, T), E> + Send + 'static,
{
    let (ready_tx, ready_rx) = oneshot::channel::<Result<T, E>>();
    let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || match build() {
            Ok((stream, meta)) => {
                if ready_tx.send(Ok(meta)).is_err() {
                    return;
                }
                // Blocks until the StreamHandle (sole sender) is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        })
        .map_err(|e| {
            log::error!("failed to spawn audio device thread: {e}");
            E::from(DeviceThreadError)
        })?;

    let meta = ready_rx.await.map_err(|_| E::from(DeviceThreadError))??;
    Ok((meta, StreamHandle::new(DeviceThread { _stop: stop_tx })))
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while acquiring the microphone.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("input device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("unsupported input sample format: {0:?}")]
    UnsupportedFormat(cpal::SampleFormat),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error(transparent)]
    Thread(#[from] DeviceThreadError),
}

// ---------------------------------------------------------------------------
// InputDevice
// ---------------------------------------------------------------------------

/// A microphone that can be exclusively acquired for one live session.
#[async_trait]
pub trait InputDevice: Send + Sync {
    /// Open the device and start delivering chunks to `tx`.
    ///
    /// Suspends until the platform grants access.  The microphone stays in
    /// use until the returned handle is dropped.
    async fn acquire(
        &self,
        tx: mpsc::UnboundedSender<AudioChunk>,
    ) -> Result<StreamHandle, CaptureError>;
}

// ---------------------------------------------------------------------------
// CpalInput
// ---------------------------------------------------------------------------

/// Microphone capture built on top of `cpal`.
///
/// Uses the default input device unless a device name is configured.
#[derive(Debug, Clone, Default)]
pub struct CpalInput {
    device_name: Option<String>,
}

impl CpalInput {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

#[async_trait]
impl InputDevice for CpalInput {
    async fn acquire(
        &self,
        tx: mpsc::UnboundedSender<AudioChunk>,
    ) -> Result<StreamHandle, CaptureError> {
        let device_name = self.device_name.clone();
        let ((sample_rate, channels), handle) =
            open_on_device_thread("mic-capture", move || open_input_stream(device_name, tx))
                .await?;
        log::info!("capture: microphone open ({sample_rate} Hz, {channels} ch)");
        Ok(handle)
    }
}

fn find_input_device(name: Option<&str>) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    match name {
        None => host.default_input_device().ok_or(CaptureError::NoDevice),
        Some(wanted) => host
            .input_devices()?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| CaptureError::DeviceNotFound(wanted.to_string())),
    }
}

fn open_input_stream(
    device_name: Option<String>,
    tx: mpsc::UnboundedSender<AudioChunk>,
) -> Result<(cpal::Stream, (u32, u16)), CaptureError> {
    let device = find_input_device(device_name.as_deref())?;
    let supported = device.default_input_config()?;
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let meta = (config.sample_rate.0, config.channels);

    let stream = match format {
        cpal::SampleFormat::F32 => build_input::<f32>(&device, &config, tx)?,
        cpal::SampleFormat::I16 => build_input::<i16>(&device, &config, tx)?,
        cpal::SampleFormat::U16 => build_input::<u16>(&device, &config, tx)?,
        other => return Err(CaptureError::UnsupportedFormat(other)),
    };
    stream.play()?;
    Ok((stream, meta))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tx: mpsc::UnboundedSender<AudioChunk>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let chunk = AudioChunk {
                samples: data.iter().map(|&s| f32::from_sample(s)).collect(),
                sample_rate,
                channels,
            };
            // Receiver gone means the session is tearing down.
            let _ = tx.send(chunk);
        },
        |err: cpal::StreamError| {
            log::error!("cpal input stream error: {err}");
        },
        None,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
