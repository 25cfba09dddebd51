//! Capture pipeline: raw device chunks → fixed-size frames → encoded blobs.
//!
//! cpal delivers buffers of whatever size and format the host prefers
//! (e.g. 441 stereo frames at 44.1 kHz).  [`BlockFramer`] normalises them
//! into exact `block_size` mono frames at the streaming input rate, and
//! [`CapturePipeline`] encodes each frame and hands it to the
//! [`OutboundQueue`].
//!
//! ```text
//! AudioChunk ─▶ stereo_to_mono ─▶ StreamResampler ─▶ pending ─▶ AudioFrame × n
//!                                                              └─▶ encode_frame ─▶ OutboundQueue
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::audio::capture::AudioChunk;
use crate::audio::queue::{OutboundQueue, PushOutcome};
use crate::audio::resample::{stereo_to_mono, StreamResampler};
use crate::codec::{encode_frame, AudioFrame};

// ---------------------------------------------------------------------------
// BlockFramer
// ---------------------------------------------------------------------------

/// Re-blocks a continuous stream of device chunks into fixed-size mono frames.
pub struct BlockFramer {
    block_size: usize,
    target_rate: u32,
    resampler: Option<StreamResampler>,
    pending: Vec<f32>,
}

impl BlockFramer {
    /// # Panics
    ///
    /// Panics if `block_size == 0`.
    pub fn new(block_size: usize, target_rate: u32) -> Self {
        assert!(block_size > 0, "BlockFramer block size must be > 0");
        Self {
            block_size,
            target_rate,
            resampler: None,
            pending: Vec::with_capacity(block_size * 2),
        }
    }

    /// Add one device chunk and return every frame it completed.
    ///
    /// A change in the chunk's sample rate replaces the resampler; samples
    /// already pending are kept since they are at the target rate.
    pub fn push_chunk(&mut self, chunk: &AudioChunk) -> Vec<AudioFrame> {
        let mono = stereo_to_mono(&chunk.samples, chunk.channels);

        let needs_new = self
            .resampler
            .as_ref()
            .map_or(true, |r| r.source_rate() != chunk.sample_rate);
        if needs_new {
            log::debug!(
                "capture: resampling {} Hz → {} Hz",
                chunk.sample_rate,
                self.target_rate
            );
            self.resampler = Some(StreamResampler::new(chunk.sample_rate, self.target_rate));
        }

        let resampled = match self.resampler.as_mut() {
            Some(r) => r.process(&mono),
            None => mono,
        };
        self.pending.extend_from_slice(&resampled);

        let mut frames = Vec::new();
        while self.pending.len() >= self.block_size {
            let block: Vec<f32> = self.pending.drain(..self.block_size).collect();
            frames.push(AudioFrame::new(block, self.target_rate));
        }
        frames
    }

    /// Discard partial data and resampler state.
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(r) = self.resampler.as_mut() {
            r.reset();
        }
    }

    /// Samples waiting for the next full frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Wall-clock span of one frame (4096 @ 16 kHz = 256 ms).
    pub fn block_duration(&self) -> Duration {
        if self.target_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.block_size as f64 / self.target_rate as f64)
    }
}

// ---------------------------------------------------------------------------
// CapturePipeline
// ---------------------------------------------------------------------------

/// Frames, encodes and enqueues microphone audio for one live session.
///
/// Owned by the session loop; it only forwards audio while `enabled`, which
/// the controller flips once the connection is open.
pub struct CapturePipeline {
    framer: BlockFramer,
    queue: Arc<OutboundQueue>,
    enabled: bool,
    blocks_encoded: u64,
}

impl CapturePipeline {
    pub fn new(framer: BlockFramer, queue: Arc<OutboundQueue>) -> Self {
        Self {
            framer,
            queue,
            enabled: false,
            blocks_encoded: 0,
        }
    }

    /// Start or stop forwarding.  Disabling drops any partial frame.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled && !enabled {
            self.framer.reset();
        }
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Process one device chunk; returns the number of blocks enqueued.
    pub fn on_chunk(&mut self, chunk: &AudioChunk) -> usize {
        if !self.enabled {
            return 0;
        }

        let mut queued = 0;
        for frame in self.framer.push_chunk(chunk) {
            let blob = encode_frame(&frame);
            self.blocks_encoded += 1;
            match self.queue.push(blob) {
                PushOutcome::Queued => queued += 1,
                PushOutcome::EvictedOldest => {
                    queued += 1;
                    log::warn!(
                        "capture: outbound queue full, evicted oldest block ({} dropped so far)",
                        self.queue.dropped()
                    );
                }
                PushOutcome::Rejected => {
                    log::warn!(
                        "capture: outbound queue full, discarded new block ({} dropped so far)",
                        self.queue.dropped()
                    );
                }
                PushOutcome::Closed => {
                    log::debug!("capture: outbound queue closed, discarding block");
                }
            }
        }
        queued
    }

    pub fn blocks_encoded(&self) -> u64 {
        self.blocks_encoded
    }

    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
