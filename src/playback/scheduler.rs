//! Gapless playback scheduling of decoded model audio.
//!
//! [`PlaybackScheduler`] keeps a single playback cursor: the device-clock
//! time at which the next segment may start.  Each new segment starts at
//! `max(cursor, now)` and pushes the cursor to its end, so segments that
//! arrive faster than real time play back-to-back with no gap or overlap,
//! while a stalled producer simply resumes on the live clock.
//!
//! ```text
//! now=0.00  schedule(0.20s) → [0.00, 0.20)   cursor=0.20
//! now=0.05  schedule(0.20s) → [0.20, 0.40)   cursor=0.40
//! interrupt()               → stop all       cursor=0 (unset)
//! now=0.31  schedule(0.20s) → [0.31, 0.51)   cursor=0.51
//! ```
//!
//! The scheduler is owned by one task; nothing else writes the cursor.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::codec::DecodedSegment;
use crate::playback::PlaybackError;

// ---------------------------------------------------------------------------
// SegmentId / ScheduledSegment
// ---------------------------------------------------------------------------

/// Identifies one scheduled segment for the lifetime of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub u64);

/// Where on the device clock a segment was placed (seconds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSegment {
    pub id: SegmentId,
    pub start: f64,
    pub end: f64,
}

impl ScheduledSegment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

// ---------------------------------------------------------------------------
// ActiveSegmentSet
// ---------------------------------------------------------------------------

/// Segments that have been started but have not finished or been stopped.
///
/// "Speaking" is defined as this set being non-empty.
#[derive(Debug, Default)]
pub struct ActiveSegmentSet {
    segments: BTreeMap<SegmentId, ScheduledSegment>,
}

impl ActiveSegmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, segment: ScheduledSegment) {
        self.segments.insert(segment.id, segment);
    }

    pub fn remove(&mut self, id: SegmentId) -> Option<ScheduledSegment> {
        self.segments.remove(&id)
    }

    /// Empty the set in one step, returning its members in id order.
    pub fn drain(&mut self) -> Vec<ScheduledSegment> {
        std::mem::take(&mut self.segments).into_values().collect()
    }

    pub fn contains(&self, id: SegmentId) -> bool {
        self.segments.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScheduledSegment> {
        self.segments.values()
    }
}

// ---------------------------------------------------------------------------
// AudioOutput / OutputDevice
// ---------------------------------------------------------------------------

/// An open output device with its own clock, modelled on a web audio
/// context: segments are started at absolute clock times and can be stopped
/// individually.
pub trait AudioOutput: Send {
    /// Current device clock in seconds since the output was opened.
    fn current_time(&self) -> f64;

    /// Begin playing `segment` at clock time `at`.  The device reports the
    /// segment's natural end by sending `id` on its finished channel.
    fn start_segment(&mut self, id: SegmentId, at: f64, segment: &DecodedSegment);

    /// Silence `id` immediately.  No finished report follows.
    fn stop_segment(&mut self, id: SegmentId);
}

impl<O: AudioOutput + ?Sized> AudioOutput for Box<O> {
    fn current_time(&self) -> f64 {
        (**self).current_time()
    }

    fn start_segment(&mut self, id: SegmentId, at: f64, segment: &DecodedSegment) {
        (**self).start_segment(id, at, segment)
    }

    fn stop_segment(&mut self, id: SegmentId) {
        (**self).stop_segment(id)
    }
}

/// A speaker that can be opened for one live session.
#[async_trait]
pub trait OutputDevice: Send + Sync {
    /// Open the device.  Natural segment completions are reported on
    /// `finished`.
    async fn open(
        &self,
        finished: mpsc::UnboundedSender<SegmentId>,
    ) -> Result<Box<dyn AudioOutput>, PlaybackError>;
}

// ---------------------------------------------------------------------------
// PlaybackScheduler
// ---------------------------------------------------------------------------

/// Orders decoded segments onto an [`AudioOutput`] back-to-back.
pub struct PlaybackScheduler<O: AudioOutput> {
    output: O,
    /// Device time at which the next segment may start; `0.0` means unset.
    cursor: f64,
    active: ActiveSegmentSet,
    next_id: u64,
}

impl<O: AudioOutput> PlaybackScheduler<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            cursor: 0.0,
            active: ActiveSegmentSet::new(),
            next_id: 0,
        }
    }

    /// Schedule `segment` to start when the previous one ends (or now, if
    /// that is later).  Empty segments are not scheduled.
    pub fn schedule(&mut self, segment: &DecodedSegment) -> Option<ScheduledSegment> {
        if segment.frames() == 0 {
            return None;
        }

        let now = self.output.current_time();
        let start = self.cursor.max(now);
        let id = SegmentId(self.next_id);
        self.next_id += 1;

        self.output.start_segment(id, start, segment);

        let scheduled = ScheduledSegment {
            id,
            start,
            end: start + segment.duration(),
        };
        self.cursor = scheduled.end;
        self.active.insert(scheduled);
        Some(scheduled)
    }

    /// Record that `id` finished playing.  Returns `true` when this emptied
    /// the active set, i.e. speaking just stopped.
    pub fn complete(&mut self, id: SegmentId) -> bool {
        self.active.remove(id).is_some() && self.active.is_empty()
    }

    /// Server-side interruption: silence everything and unset the cursor so
    /// the next segment anchors on the live device clock.  Returns how many
    /// segments were cut off.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.stop_all();
        self.cursor = 0.0;
        stopped
    }

    /// Stop every active segment and empty the set.
    pub fn stop_all(&mut self) -> usize {
        let segments = self.active.drain();
        for segment in &segments {
            self.output.stop_segment(segment.id);
        }
        segments.len()
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn active(&self) -> &ActiveSegmentSet {
        &self.active
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    /// Give back the output device, e.g. to close it.
    pub fn into_output(self) -> O {
        self.output
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
