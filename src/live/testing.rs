//! Test doubles for the live session: a scripted microphone, a speaker with
//! a hand-driven clock and a transport whose server side the test plays.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::audio::{AudioChunk, CaptureError, InputDevice, StreamHandle};
use crate::codec::DecodedSegment;
use crate::live::protocol::{ClientMessage, SessionSetup};
use crate::live::transport::{LiveConnection, LiveTransport, TransportError, TransportEvent};
use crate::playback::{AudioOutput, OutputDevice, PlaybackError, SegmentId};

// ---------------------------------------------------------------------------
// MockInput
// ---------------------------------------------------------------------------

type ChunkSlot = Arc<Mutex<Option<mpsc::UnboundedSender<AudioChunk>>>>;

/// Releasing the microphone stops delivery by dropping the chunk sender.
struct MicGuard {
    held: Arc<AtomicBool>,
    tx: ChunkSlot,
    release_delay: Option<Duration>,
}

impl Drop for MicGuard {
    fn drop(&mut self) {
        if let Some(delay) = self.release_delay {
            // Real drivers block for a while when a stream is torn down.
            std::thread::sleep(delay);
        }
        self.held.store(false, Ordering::SeqCst);
        self.tx.lock().unwrap().take();
    }
}

/// Microphone whose chunks are pushed by the test.
#[derive(Clone, Default)]
pub struct MockInput {
    fail: bool,
    release_delay: Option<Duration>,
    held: Arc<AtomicBool>,
    acquisitions: Arc<AtomicUsize>,
    tx: ChunkSlot,
}

impl MockInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// A microphone that always refuses access.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// A microphone whose release blocks for `delay`.
    pub fn slow_release(delay: Duration) -> Self {
        Self {
            release_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Deliver `samples` (mono) as one device callback.
    pub fn push(&self, samples: Vec<f32>, sample_rate: u32) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(AudioChunk {
                samples,
                sample_rate,
                channels: 1,
            });
        }
    }

    /// Simulate the device disappearing mid-session.
    pub fn unplug(&self) {
        self.tx.lock().unwrap().take();
    }
}

#[async_trait]
impl InputDevice for MockInput {
    async fn acquire(
        &self,
        tx: mpsc::UnboundedSender<AudioChunk>,
    ) -> Result<StreamHandle, CaptureError> {
        if self.fail {
            return Err(CaptureError::NoDevice);
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.held.store(true, Ordering::SeqCst);
        *self.tx.lock().unwrap() = Some(tx);
        Ok(StreamHandle::new(MicGuard {
            held: Arc::clone(&self.held),
            tx: Arc::clone(&self.tx),
            release_delay: self.release_delay,
        }))
    }
}

// ---------------------------------------------------------------------------
// SimOutput
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Started {
    pub id: SegmentId,
    pub at: f64,
    pub frames: usize,
    pub sample_rate: u32,
}

#[derive(Default)]
struct SimShared {
    now: Mutex<f64>,
    started: Mutex<Vec<Started>>,
    stopped: Mutex<Vec<SegmentId>>,
    finished: Mutex<Option<mpsc::UnboundedSender<SegmentId>>>,
    open: AtomicBool,
}

/// Speaker with a manual clock that records every start and stop.
#[derive(Clone, Default)]
pub struct SimOutput {
    fail: bool,
    shared: Arc<SimShared>,
}

impl SimOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn set_time(&self, t: f64) {
        *self.shared.now.lock().unwrap() = t;
    }

    pub fn started(&self) -> Vec<Started> {
        self.shared.started.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<SegmentId> {
        self.shared.stopped.lock().unwrap().clone()
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Report `id` as having played to its end.
    pub fn finish(&self, id: SegmentId) {
        if let Some(tx) = self.shared.finished.lock().unwrap().as_ref() {
            let _ = tx.send(id);
        }
    }
}

struct SimAudioOutput {
    shared: Arc<SimShared>,
}

impl AudioOutput for SimAudioOutput {
    fn current_time(&self) -> f64 {
        *self.shared.now.lock().unwrap()
    }

    fn start_segment(&mut self, id: SegmentId, at: f64, segment: &DecodedSegment) {
        self.shared.started.lock().unwrap().push(Started {
            id,
            at,
            frames: segment.frames(),
            sample_rate: segment.sample_rate,
        });
    }

    fn stop_segment(&mut self, id: SegmentId) {
        self.shared.stopped.lock().unwrap().push(id);
    }
}

impl Drop for SimAudioOutput {
    fn drop(&mut self) {
        self.shared.open.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl OutputDevice for SimOutput {
    async fn open(
        &self,
        finished: mpsc::UnboundedSender<SegmentId>,
    ) -> Result<Box<dyn AudioOutput>, PlaybackError> {
        if self.fail {
            return Err(PlaybackError::NoDevice);
        }
        *self.shared.finished.lock().unwrap() = Some(finished);
        self.shared.open.store(true, Ordering::SeqCst);
        Ok(Box::new(SimAudioOutput {
            shared: Arc::clone(&self.shared),
        }))
    }
}

// ---------------------------------------------------------------------------
// ScriptedTransport
// ---------------------------------------------------------------------------

/// The server's end of a scripted connection.
pub struct ServerEnd {
    pub inbound: mpsc::Receiver<ClientMessage>,
    pub events: mpsc::Sender<TransportEvent>,
}

/// Transport whose server side is driven by the test.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    fail: bool,
    /// Send `Open` as soon as the connection exists.
    auto_open: bool,
    connects: Arc<AtomicUsize>,
    setups: Arc<Mutex<Vec<SessionSetup>>>,
    server: Arc<Mutex<Option<ServerEnd>>>,
    connected: Arc<Notify>,
}

impl ScriptedTransport {
    /// Acknowledges the setup immediately.
    pub fn open() -> Self {
        Self {
            auto_open: true,
            ..Self::default()
        }
    }

    /// Connects but leaves the handshake pending until the test sends `Open`.
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn setups(&self) -> Vec<SessionSetup> {
        self.setups.lock().unwrap().clone()
    }

    /// Wait until `connect` has been called.
    pub async fn wait_connected(&self) {
        self.connected.notified().await;
    }

    /// Take the server end of the most recent connection.
    pub fn server(&self) -> ServerEnd {
        self.server
            .lock()
            .unwrap()
            .take()
            .expect("no connection has been made")
    }
}

#[async_trait]
impl LiveTransport for ScriptedTransport {
    async fn connect(&self, setup: &SessionSetup) -> Result<LiveConnection, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.setups.lock().unwrap().push(setup.clone());
        if self.fail {
            return Err(TransportError::Handshake("connection refused".into()));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        if self.auto_open {
            let _ = event_tx.send(TransportEvent::Open).await;
        }
        *self.server.lock().unwrap() = Some(ServerEnd {
            inbound: outbound_rx,
            events: event_tx,
        });
        self.connected.notify_one();

        Ok(LiveConnection {
            outbound: outbound_tx,
            events: event_rx,
        })
    }
}
