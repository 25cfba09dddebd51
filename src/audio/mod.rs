//! Capture side of the live audio pipeline.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → AudioChunk (unbounded mpsc)
//!           → BlockFramer (downmix, resample to 16 kHz, 4096-sample blocks)
//!           → encode_frame → OutboundQueue (bounded) → sender task → transport
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sobjanta_live::audio::{AudioChunk, CpalInput, InputDevice};
//!
//! # async fn demo() {
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<AudioChunk>();
//! let _handle = CpalInput::default().acquire(tx).await.unwrap(); // drop → release mic
//!
//! while let Some(chunk) = rx.recv().await {
//!     println!("received {} samples @ {}Hz", chunk.samples.len(), chunk.sample_rate);
//! }
//! # }
//! ```

pub mod capture;
pub mod framer;
pub mod queue;
pub mod resample;

pub use capture::{AudioChunk, CaptureError, CpalInput, DeviceThreadError, InputDevice, StreamHandle};
pub use framer::{BlockFramer, CapturePipeline};
pub use queue::{BoundedQueue, OutboundQueue, OverflowPolicy, PushOutcome};
pub use resample::{resample_linear, stereo_to_mono, StreamResampler};

/// Samples per outbound block.
pub const CAPTURE_BLOCK_SIZE: usize = 4096;
