//! Playback side of the live audio pipeline.
//!
//! # Pipeline
//!
//! ```text
//! inbound chunk → decode_base64_pcm16 (24 kHz) → PlaybackScheduler::schedule
//!              → AudioOutput::start_segment(at = max(cursor, now))
//!              → Mixer (cpal callback) → finished SegmentId → PlaybackScheduler::complete
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sobjanta_live::codec::decode_base64_pcm16;
//! use sobjanta_live::playback::{CpalOutput, OutputDevice, PlaybackScheduler};
//!
//! # async fn demo(payload: &str) {
//! let (finished_tx, mut finished_rx) = tokio::sync::mpsc::unbounded_channel();
//! let output = CpalOutput::default().open(finished_tx).await.unwrap();
//! let mut scheduler = PlaybackScheduler::new(output);
//!
//! let segment = decode_base64_pcm16(payload, 24_000, 1).unwrap();
//! scheduler.schedule(&segment);
//!
//! while let Some(id) = finished_rx.recv().await {
//!     if scheduler.complete(id) {
//!         break; // nothing left playing
//!     }
//! }
//! # }
//! ```

pub mod output;
pub mod scheduler;

pub use output::{CpalOutput, Mixer, MixerOutput, PlaybackError};
pub use scheduler::{
    ActiveSegmentSet, AudioOutput, OutputDevice, PlaybackScheduler, ScheduledSegment, SegmentId,
};
