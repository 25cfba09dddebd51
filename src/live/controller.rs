//! Live session controller: wires microphone → model → speaker.
//!
//! [`LiveSessionController`] owns the session state machine and reacts to
//! `start()` / `stop()` calls from the front-end.
//!
//! # Session flow
//!
//! ```text
//! start()
//!   ├─▶ InputDevice::acquire          (DeviceError on failure)
//!   ├─▶ OutputDevice::open            (DeviceError on failure)
//!   ├─▶ LiveTransport::connect + wait for Open (ConnectionError / timeout)
//!   └─▶ spawn session task                                   [Open]
//!
//! session task (single timeline)
//!   mic chunk        → CapturePipeline → OutboundQueue → sender task → transport
//!   Server(Audio)    → decode → PlaybackScheduler::schedule   [speaking]
//!   Server(Interrupted) → PlaybackScheduler::interrupt
//!   finished segment → PlaybackScheduler::complete           [silent when empty]
//!   Error / Closed   → teardown, surface error               [Closed → Idle]
//!
//! stop()  → signal task → teardown                           [Closed → Idle]
//! ```
//!
//! Every `start()` and `stop()` bumps the session generation.  A `start()`
//! whose generation changed while it was suspended releases what it acquired
//! and returns quietly, and a session task only writes status for its own
//! generation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::audio::{
    AudioChunk, BlockFramer, CapturePipeline, InputDevice, OutboundQueue, StreamHandle,
};
use crate::codec::decode_base64_pcm16;
use crate::config::AppConfig;
use crate::live::error::LiveError;
use crate::live::protocol::{ClientMessage, ServerEvent, SessionSetup};
use crate::live::state::{
    new_shared_status, LiveEvent, LiveSessionState, LiveStatus, SharedStatus,
};
use crate::live::transport::{LiveConnection, LiveTransport, TransportEvent};
use crate::playback::{AudioOutput, OutputDevice, PlaybackScheduler, SegmentId};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

/// Status writer bound to one session generation.
#[derive(Clone)]
struct Reporter {
    status: SharedStatus,
    events: mpsc::UnboundedSender<LiveEvent>,
    generation: u64,
}

impl Reporter {
    /// Apply `f` if this generation is still current.  Returns whether it ran.
    fn update(&self, f: impl FnOnce(&mut LiveStatus)) -> bool {
        let mut st = lock(&self.status);
        if st.generation != self.generation {
            return false;
        }
        f(&mut st);
        true
    }

    fn emit(&self, event: LiveEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn is_current(&self) -> bool {
        lock(&self.status).generation == self.generation
    }

    fn set_speaking(&self, speaking: bool) {
        let mut changed = false;
        self.update(|st| {
            changed = st.speaking != speaking;
            st.speaking = speaking;
        });
        if changed {
            self.emit(LiveEvent::Speaking(speaking));
        }
    }

    /// `Closed` then `Idle`, clearing the activity flags and recording
    /// `error` if given.  Skipped for a stale generation.
    fn finish(&self, error: Option<String>) {
        let mut was_listening = false;
        let mut was_speaking = false;
        let ran = self.update(|st| {
            was_listening = st.listening;
            was_speaking = st.speaking;
            st.listening = false;
            st.speaking = false;
            st.state = LiveSessionState::Idle;
            if let Some(msg) = &error {
                st.error_message = Some(msg.clone());
            }
        });
        if !ran {
            return;
        }

        if let Some(msg) = error {
            self.emit(LiveEvent::Error(msg));
        }
        if was_listening {
            self.emit(LiveEvent::Listening(false));
        }
        if was_speaking {
            self.emit(LiveEvent::Speaking(false));
        }
        self.emit(LiveEvent::StateChanged(LiveSessionState::Closed));
        self.emit(LiveEvent::StateChanged(LiveSessionState::Idle));
    }
}

// ---------------------------------------------------------------------------
// LiveSessionController
// ---------------------------------------------------------------------------

struct SessionHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns at most one live session at a time.
///
/// Methods take `&self`, so the controller can be shared behind an `Arc`
/// between the hotkey loop and anything else that needs to stop it.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use sobjanta_live::audio::CpalInput;
/// use sobjanta_live::config::AppConfig;
/// use sobjanta_live::live::{LiveSessionController, WebSocketTransport};
/// use sobjanta_live::playback::CpalOutput;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = AppConfig::load()?;
/// let transport = WebSocketTransport::from_config(&config.live)?;
/// let (controller, mut events) = LiveSessionController::new(
///     config,
///     Arc::new(CpalInput::default()),
///     Arc::new(CpalOutput::default()),
///     Arc::new(transport),
/// );
///
/// controller.start().await?;
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// controller.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct LiveSessionController {
    config: AppConfig,
    input: Arc<dyn InputDevice>,
    output: Arc<dyn OutputDevice>,
    transport: Arc<dyn LiveTransport>,
    status: SharedStatus,
    events: mpsc::UnboundedSender<LiveEvent>,
    /// Mirrors `status.generation`; lets a suspended `start()` notice `stop()`.
    generation: watch::Sender<u64>,
    session: Mutex<Option<SessionHandle>>,
    /// Held by `stop()` for its whole teardown so overlapping stops queue up.
    teardown: tokio::sync::Mutex<()>,
}

impl LiveSessionController {
    pub fn new(
        config: AppConfig,
        input: Arc<dyn InputDevice>,
        output: Arc<dyn OutputDevice>,
        transport: Arc<dyn LiveTransport>,
    ) -> (Self, mpsc::UnboundedReceiver<LiveEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (generation, _) = watch::channel(0);
        let controller = Self {
            config,
            input,
            output,
            transport,
            status: new_shared_status(),
            events,
            generation,
            session: Mutex::new(None),
            teardown: tokio::sync::Mutex::new(()),
        };
        (controller, events_rx)
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> LiveStatus {
        lock(&self.status).clone()
    }

    pub fn state(&self) -> LiveSessionState {
        lock(&self.status).state
    }

    /// Shared handle for front-ends that render status directly.
    pub fn shared_status(&self) -> SharedStatus {
        Arc::clone(&self.status)
    }

    fn reporter(&self, generation: u64) -> Reporter {
        Reporter {
            status: Arc::clone(&self.status),
            events: self.events.clone(),
            generation,
        }
    }

    // -----------------------------------------------------------------------
    // start
    // -----------------------------------------------------------------------

    /// Acquire the microphone and speaker, connect, and go live.
    ///
    /// Returns once the server has acknowledged the session.  If `stop()` is
    /// called while this is suspended, everything acquired so far is released
    /// and `Ok(())` is returned.
    ///
    /// # Errors
    ///
    /// * [`LiveError::AlreadyActive`] if a session is not `Idle`; the existing
    ///   session is untouched.
    /// * [`LiveError::Device`] if either audio device cannot be opened.  No
    ///   network activity has happened.
    /// * [`LiveError::Connection`] if the handshake fails or times out.
    pub async fn start(&self) -> Result<(), LiveError> {
        let generation = {
            let mut st = lock(&self.status);
            if st.state.is_active() {
                return Err(LiveError::AlreadyActive);
            }
            st.generation += 1;
            st.state = LiveSessionState::Connecting;
            st.reset_session();
            st.generation
        };
        self.generation.send_replace(generation);
        let mut cancelled = self.generation.subscribe();
        let reporter = self.reporter(generation);
        reporter.emit(LiveEvent::StateChanged(LiveSessionState::Connecting));
        log::info!("live: starting session (generation {generation})");

        // ── 1. Microphone ─────────────────────────────────────────────────
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel::<AudioChunk>();
        let capture = match guarded(&mut cancelled, generation, self.input.acquire(chunk_tx)).await
        {
            None => return self.abandoned(generation),
            Some(Err(e)) => return Err(self.fail_start(&reporter, e.into())),
            Some(Ok(handle)) => handle,
        };

        // ── 2. Speaker ────────────────────────────────────────────────────
        let (finished_tx, finished_rx) = mpsc::unbounded_channel::<SegmentId>();
        let output = match guarded(&mut cancelled, generation, self.output.open(finished_tx)).await
        {
            None => return self.abandoned(generation),
            Some(Err(e)) => {
                drop(capture);
                return Err(self.fail_start(&reporter, e.into()));
            }
            Some(Ok(output)) => output,
        };

        // ── 3. Connection ─────────────────────────────────────────────────
        let setup = SessionSetup::from_config(&self.config.live);
        let timeout = self.config.live.connect_timeout();
        let handshake = tokio::time::timeout(timeout, handshake(self.transport.as_ref(), &setup));
        let connection = match guarded(&mut cancelled, generation, handshake).await {
            None => return self.abandoned(generation),
            Some(Ok(Ok(connection))) => connection,
            Some(result) => {
                drop(capture);
                drop(output);
                let err = match result {
                    Ok(Err(e)) => e,
                    _ => LiveError::Connection(format!(
                        "handshake timed out after {}s",
                        timeout.as_secs()
                    )),
                };
                return Err(self.fail_start(&reporter, err));
            }
        };

        // ── 4. Go live ────────────────────────────────────────────────────
        let mut slot = lock(&self.session);
        if !reporter.is_current() {
            drop(slot);
            return self.abandoned(generation);
        }

        let resources = SessionResources {
            capture,
            chunk_rx,
            output,
            finished_rx,
            connection,
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let session = Session::new(&self.config, reporter.clone(), resources);
        reporter.update(|st| {
            st.state = LiveSessionState::Open;
            st.listening = true;
        });
        let task = tokio::spawn(session.run(shutdown_rx));
        *slot = Some(SessionHandle {
            shutdown: shutdown_tx,
            task,
        });
        drop(slot);

        reporter.emit(LiveEvent::StateChanged(LiveSessionState::Open));
        reporter.emit(LiveEvent::Listening(true));
        log::info!("live: session open");
        Ok(())
    }

    fn fail_start(&self, reporter: &Reporter, err: LiveError) -> LiveError {
        log::error!("live: start failed: {err}");
        reporter.finish(Some(err.to_string()));
        err
    }

    fn abandoned(&self, generation: u64) -> Result<(), LiveError> {
        log::info!("live: start of generation {generation} abandoned after stop()");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // stop
    // -----------------------------------------------------------------------

    /// Tear the session down and return to `Idle`.
    ///
    /// Safe to call at any time, any number of times, including while a
    /// `start()` is still connecting.  A call that overlaps another `stop()`
    /// returns only after that teardown has released the devices.
    pub async fn stop(&self) {
        let _teardown = self.teardown.lock().await;

        let (handle, previous, generation) = {
            let mut slot = lock(&self.session);
            let handle = slot.take();
            let mut st = lock(&self.status);
            let previous = st.state;
            st.generation += 1;
            if previous.is_active() {
                st.state = LiveSessionState::Closing;
            }
            self.generation.send_replace(st.generation);
            (handle, previous, st.generation)
        };

        if let Some(handle) = handle {
            let _ = handle.shutdown.send(());
            if let Err(e) = handle.task.await {
                log::error!("live: session task failed: {e}");
            }
        }

        if !previous.is_active() {
            return;
        }

        let flags = {
            let mut st = lock(&self.status);
            if st.generation != generation {
                // A newer start() owns the status now.
                None
            } else {
                let flags = (st.listening, st.speaking);
                st.listening = false;
                st.speaking = false;
                st.state = LiveSessionState::Idle;
                Some(flags)
            }
        };
        let Some((was_listening, was_speaking)) = flags else {
            return;
        };
        if was_listening {
            let _ = self.events.send(LiveEvent::Listening(false));
        }
        if was_speaking {
            let _ = self.events.send(LiveEvent::Speaking(false));
        }
        let _ = self
            .events
            .send(LiveEvent::StateChanged(LiveSessionState::Closed));
        let _ = self
            .events
            .send(LiveEvent::StateChanged(LiveSessionState::Idle));
        log::info!("live: session stopped");
    }
}

/// Await `fut` unless the generation moves away from `generation` first.
/// `None` means the caller's session is stale.
async fn guarded<F: std::future::Future>(
    cancelled: &mut watch::Receiver<u64>,
    generation: u64,
    fut: F,
) -> Option<F::Output> {
    if *cancelled.borrow() != generation {
        return None;
    }
    let out = tokio::select! {
        out = fut => out,
        _ = cancelled.changed() => return None,
    };
    if *cancelled.borrow() != generation {
        return None;
    }
    Some(out)
}

/// Connect and wait for the server to acknowledge the setup.
async fn handshake(
    transport: &dyn LiveTransport,
    setup: &SessionSetup,
) -> Result<LiveConnection, LiveError> {
    let mut connection = transport.connect(setup).await?;
    loop {
        match connection.events.recv().await {
            Some(TransportEvent::Open) => return Ok(connection),
            Some(TransportEvent::Server(event)) => {
                log::debug!("live: ignoring {event:?} before setup completed");
            }
            Some(TransportEvent::Error(msg)) => return Err(LiveError::Connection(msg)),
            Some(TransportEvent::Closed(reason)) => {
                return Err(LiveError::Connection(
                    reason.unwrap_or_else(|| "closed during handshake".into()),
                ))
            }
            None => return Err(LiveError::Connection("closed during handshake".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

struct SessionResources {
    capture: StreamHandle,
    chunk_rx: mpsc::UnboundedReceiver<AudioChunk>,
    output: Box<dyn AudioOutput>,
    finished_rx: mpsc::UnboundedReceiver<SegmentId>,
    connection: LiveConnection,
}

/// Why the session loop ended.
enum Ending {
    Stopped,
    Failed(LiveError),
}

struct Session {
    reporter: Reporter,
    output_rate: u32,
    capture: Option<StreamHandle>,
    chunk_rx: mpsc::UnboundedReceiver<AudioChunk>,
    pipeline: CapturePipeline,
    queue: Arc<OutboundQueue>,
    sender: JoinHandle<()>,
    scheduler: PlaybackScheduler<Box<dyn AudioOutput>>,
    finished_rx: mpsc::UnboundedReceiver<SegmentId>,
    events: mpsc::Receiver<TransportEvent>,
}

impl Session {
    fn new(config: &AppConfig, reporter: Reporter, resources: SessionResources) -> Self {
        let audio = &config.audio;
        let queue = Arc::new(OutboundQueue::new(
            audio.outbound_queue_blocks.max(1),
            audio.overflow_policy,
        ));
        let framer = BlockFramer::new(audio.block_size.max(1), audio.input_sample_rate);
        let mut pipeline = CapturePipeline::new(framer, Arc::clone(&queue));
        pipeline.set_enabled(true);

        let LiveConnection { outbound, events } = resources.connection;
        let sender = tokio::spawn(send_blocks(
            Arc::clone(&queue),
            outbound,
            reporter.clone(),
        ));

        let mut chunk_rx = resources.chunk_rx;
        let mut stale = 0usize;
        while chunk_rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            log::debug!("live: discarded {stale} chunks captured before the session opened");
        }

        Self {
            reporter,
            output_rate: audio.output_sample_rate,
            capture: Some(resources.capture),
            chunk_rx,
            pipeline,
            queue,
            sender,
            scheduler: PlaybackScheduler::new(resources.output),
            finished_rx: resources.finished_rx,
            events,
        }
    }

    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let ending = loop {
            tokio::select! {
                _ = &mut shutdown => break Ending::Stopped,

                chunk = self.chunk_rx.recv() => match chunk {
                    Some(chunk) => self.on_chunk(&chunk),
                    None => break Ending::Failed(LiveError::Device(
                        "microphone stream ended".into(),
                    )),
                },

                event = self.events.recv() => match event {
                    Some(TransportEvent::Server(event)) => self.on_server_event(event),
                    Some(TransportEvent::Open) => {}
                    Some(TransportEvent::Error(msg)) => {
                        break Ending::Failed(LiveError::Connection(msg));
                    }
                    Some(TransportEvent::Closed(reason)) => {
                        break Ending::Failed(LiveError::Connection(
                            reason.unwrap_or_else(|| "closed by server".into()),
                        ));
                    }
                    None => break Ending::Failed(LiveError::Connection("closed by server".into())),
                },

                Some(id) = self.finished_rx.recv() => {
                    if self.scheduler.complete(id) {
                        self.reporter.set_speaking(false);
                    }
                }
            }
        };

        let reporter = self.reporter.clone();
        self.teardown().await;
        drop(self);

        match ending {
            Ending::Stopped => log::debug!("live: session task stopped"),
            Ending::Failed(err) => {
                log::error!("live: session ended: {err}");
                reporter.finish(Some(err.to_string()));
            }
        }
    }

    fn on_chunk(&mut self, chunk: &AudioChunk) {
        self.pipeline.on_chunk(chunk);
        let dropped = self.queue.dropped();
        self.reporter.update(|st| st.blocks_dropped = dropped);
    }

    fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Audio { data, sample_rate } => {
                let rate = sample_rate.unwrap_or(self.output_rate);
                match decode_base64_pcm16(&data, rate, 1).map_err(LiveError::from) {
                    Ok(segment) => {
                        if self.scheduler.schedule(&segment).is_some() {
                            self.reporter.update(|st| st.segments_scheduled += 1);
                            self.reporter.set_speaking(true);
                        }
                    }
                    Err(e) => {
                        log::warn!("live: dropping inbound chunk: {e}");
                        self.reporter.update(|st| st.decode_errors += 1);
                    }
                }
            }
            ServerEvent::Interrupted => {
                let stopped = self.scheduler.interrupt();
                log::info!("live: interrupted, stopped {stopped} segments");
                self.reporter.set_speaking(false);
            }
            ServerEvent::InputTranscript(text) => {
                if self.reporter.update(|st| st.input_transcript.push_str(&text)) {
                    self.reporter.emit(LiveEvent::InputTranscript(text));
                }
            }
            ServerEvent::OutputTranscript(text) => {
                if self.reporter.update(|st| st.output_transcript.push_str(&text)) {
                    self.reporter.emit(LiveEvent::OutputTranscript(text));
                }
            }
            ServerEvent::TurnComplete => {
                let ran = self.reporter.update(|st| {
                    st.input_transcript.clear();
                    st.output_transcript.clear();
                });
                if ran {
                    self.reporter.emit(LiveEvent::TurnComplete);
                }
            }
            ServerEvent::GoAway { time_left } => {
                log::warn!(
                    "live: server is going away (time left: {})",
                    time_left.as_deref().unwrap_or("unknown")
                );
            }
            ServerEvent::SetupComplete => {}
        }
    }

    /// Release the microphone, the outbound queue, the sender and the
    /// connection, then silence playback.  The speaker itself is released
    /// when the session is dropped.
    async fn teardown(&mut self) {
        drop(self.capture.take());
        self.pipeline.set_enabled(false);

        self.queue.close();
        self.sender.abort();
        if let Err(e) = (&mut self.sender).await {
            if !e.is_cancelled() {
                log::error!("live: sender task failed: {e}");
            }
        }

        self.events.close();
        while self.events.try_recv().is_ok() {}

        let stopped = self.scheduler.stop_all();
        if stopped > 0 {
            log::debug!("live: stopped {stopped} segments on teardown");
        }
        self.finished_rx.close();
        log::debug!("live: session resources released");
    }
}

/// Drain the outbound queue into the connection, one frame per block.
async fn send_blocks(
    queue: Arc<OutboundQueue>,
    outbound: mpsc::Sender<ClientMessage>,
    reporter: Reporter,
) {
    while let Some(blob) = queue.recv().await {
        if outbound.send(ClientMessage::audio(&blob)).await.is_err() {
            log::debug!("live: connection closed, sender exiting");
            return;
        }
        reporter.update(|st| st.blocks_sent += 1);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use base64::{engine::general_purpose::STANDARD, Engine as _};

    use super::*;
    use crate::live::testing::{MockInput, ScriptedTransport, SimOutput};

    struct Rig {
        ctl: Arc<LiveSessionController>,
        events: mpsc::UnboundedReceiver<LiveEvent>,
        mic: MockInput,
        out: SimOutput,
        transport: ScriptedTransport,
    }

    fn rig_with(
        config: AppConfig,
        mic: MockInput,
        out: SimOutput,
        transport: ScriptedTransport,
    ) -> Rig {
        let (ctl, events) = LiveSessionController::new(
            config,
            Arc::new(mic.clone()),
            Arc::new(out.clone()),
            Arc::new(transport.clone()),
        );
        Rig {
            ctl: Arc::new(ctl),
            events,
            mic,
            out,
            transport,
        }
    }

    fn rig() -> Rig {
        rig_with(
            AppConfig::default(),
            MockInput::new(),
            SimOutput::new(),
            ScriptedTransport::open(),
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<LiveEvent>) -> Vec<LiveEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Inbound audio chunk of `frames` silent 24 kHz samples.
    fn audio(frames: usize) -> TransportEvent {
        TransportEvent::Server(ServerEvent::Audio {
            data: STANDARD.encode(vec![0u8; frames * 2]),
            sample_rate: Some(24_000),
        })
    }

    // ---- start / stop ---

    #[tokio::test]
    async fn stop_without_start_is_a_noop() {
        let mut r = rig();
        r.ctl.stop().await;
        r.ctl.stop().await;
        assert_eq!(r.ctl.state(), LiveSessionState::Idle);
        assert!(drain(&mut r.events).is_empty());
    }

    #[tokio::test]
    async fn start_goes_live() {
        let mut r = rig();
        r.ctl.start().await.expect("start");

        let st = r.ctl.status();
        assert_eq!(st.state, LiveSessionState::Open);
        assert!(st.listening);
        assert!(!st.speaking);
        assert!(r.mic.is_held());
        assert!(r.out.is_open());

        let setups = r.transport.setups();
        assert_eq!(setups.len(), 1);
        assert_eq!(setups[0].voice_name.as_deref(), Some("Kore"));

        assert_eq!(
            drain(&mut r.events),
            vec![
                LiveEvent::StateChanged(LiveSessionState::Connecting),
                LiveEvent::StateChanged(LiveSessionState::Open),
                LiveEvent::Listening(true),
            ]
        );
        r.ctl.stop().await;
    }

    #[tokio::test]
    async fn second_start_is_rejected_and_session_survives() {
        let r = rig();
        r.ctl.start().await.expect("start");
        assert!(matches!(r.ctl.start().await, Err(LiveError::AlreadyActive)));
        assert_eq!(r.ctl.state(), LiveSessionState::Open);
        assert_eq!(r.mic.acquisitions(), 1);
        assert!(r.mic.is_held());
        r.ctl.stop().await;
    }

    #[tokio::test]
    async fn stop_twice_releases_everything_once() {
        let mut r = rig();
        r.ctl.start().await.expect("start");
        drain(&mut r.events);

        r.ctl.stop().await;
        assert_eq!(r.ctl.state(), LiveSessionState::Idle);
        assert!(!r.mic.is_held());
        assert!(!r.out.is_open());
        assert!(!r.ctl.status().listening);
        assert_eq!(
            drain(&mut r.events),
            vec![
                LiveEvent::Listening(false),
                LiveEvent::StateChanged(LiveSessionState::Closed),
                LiveEvent::StateChanged(LiveSessionState::Idle),
            ]
        );

        r.ctl.stop().await;
        assert_eq!(r.ctl.state(), LiveSessionState::Idle);
        assert!(drain(&mut r.events).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overlapping_stops_wait_for_the_microphone() {
        let r = rig_with(
            AppConfig::default(),
            MockInput::slow_release(Duration::from_millis(200)),
            SimOutput::new(),
            ScriptedTransport::open(),
        );
        r.ctl.start().await.expect("start");

        let first = {
            let ctl = Arc::clone(&r.ctl);
            tokio::spawn(async move { ctl.stop().await })
        };
        wait_until(|| r.ctl.state() == LiveSessionState::Closing).await;

        r.ctl.stop().await;
        assert_eq!(r.ctl.state(), LiveSessionState::Idle);
        assert!(!r.mic.is_held(), "stop() returned while the microphone was held");

        r.ctl.start().await.expect("restart");
        first.await.unwrap();

        let st = r.ctl.status();
        assert_eq!(st.state, LiveSessionState::Open);
        assert!(st.listening);
        assert_eq!(r.mic.acquisitions(), 2);
        assert!(r.mic.is_held());
        assert!(matches!(r.ctl.start().await, Err(LiveError::AlreadyActive)));
        r.ctl.stop().await;
    }

    #[tokio::test]
    async fn session_can_be_restarted_after_stop() {
        let r = rig();
        r.ctl.start().await.expect("first start");
        r.ctl.stop().await;
        r.ctl.start().await.expect("second start");
        assert_eq!(r.ctl.state(), LiveSessionState::Open);
        assert_eq!(r.transport.connects(), 2);
        r.ctl.stop().await;
    }

    // ---- start failures ---

    #[tokio::test]
    async fn missing_microphone_is_a_device_error_before_any_network() {
        let mut r = rig_with(
            AppConfig::default(),
            MockInput::failing(),
            SimOutput::new(),
            ScriptedTransport::open(),
        );
        let err = r.ctl.start().await.unwrap_err();
        assert!(matches!(err, LiveError::Device(_)));
        assert_eq!(r.transport.connects(), 0);
        assert!(!r.out.is_open());

        let st = r.ctl.status();
        assert_eq!(st.state, LiveSessionState::Idle);
        assert!(st.error_message.is_some());
        assert!(drain(&mut r.events)
            .iter()
            .any(|e| matches!(e, LiveEvent::Error(_))));
    }

    #[tokio::test]
    async fn missing_speaker_releases_microphone() {
        let r = rig_with(
            AppConfig::default(),
            MockInput::new(),
            SimOutput::failing(),
            ScriptedTransport::open(),
        );
        let err = r.ctl.start().await.unwrap_err();
        assert!(matches!(err, LiveError::Device(_)));
        assert_eq!(r.mic.acquisitions(), 1);
        assert!(!r.mic.is_held());
        assert_eq!(r.transport.connects(), 0);
        assert_eq!(r.ctl.state(), LiveSessionState::Idle);
    }

    #[tokio::test]
    async fn refused_connection_releases_devices() {
        let r = rig_with(
            AppConfig::default(),
            MockInput::new(),
            SimOutput::new(),
            ScriptedTransport::refusing(),
        );
        let err = r.ctl.start().await.unwrap_err();
        assert!(matches!(err, LiveError::Connection(_)));
        assert!(!r.mic.is_held());
        assert!(!r.out.is_open());
        assert_eq!(r.ctl.state(), LiveSessionState::Idle);

        // Retrying is allowed, not AlreadyActive.
        assert!(matches!(
            r.ctl.start().await,
            Err(LiveError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn close_during_handshake_is_a_connection_error() {
        let r = rig_with(
            AppConfig::default(),
            MockInput::new(),
            SimOutput::new(),
            ScriptedTransport::pending(),
        );
        let ctl = Arc::clone(&r.ctl);
        let start = tokio::spawn(async move { ctl.start().await });

        r.transport.wait_connected().await;
        let server = r.transport.server();
        server
            .events
            .send(TransportEvent::Closed(Some("quota exceeded".into())))
            .await
            .unwrap();

        let result = start.await.unwrap();
        assert!(matches!(result, Err(LiveError::Connection(ref m)) if m.contains("quota")));
        assert!(!r.mic.is_held());
        assert_eq!(r.ctl.state(), LiveSessionState::Idle);
    }

    #[tokio::test]
    async fn handshake_timeout_is_a_connection_error() {
        let mut config = AppConfig::default();
        config.live.connect_timeout_secs = 0;
        let r = rig_with(
            config,
            MockInput::new(),
            SimOutput::new(),
            ScriptedTransport::pending(),
        );
        let err = r.ctl.start().await.unwrap_err();
        assert!(matches!(err, LiveError::Connection(ref m) if m.contains("timed out")));
        assert!(!r.mic.is_held());
        assert!(!r.out.is_open());
    }

    #[tokio::test]
    async fn stop_during_pending_handshake_cancels_start() {
        let r = rig_with(
            AppConfig::default(),
            MockInput::new(),
            SimOutput::new(),
            ScriptedTransport::pending(),
        );
        let ctl = Arc::clone(&r.ctl);
        let start = tokio::spawn(async move { ctl.start().await });

        r.transport.wait_connected().await;
        assert_eq!(r.ctl.state(), LiveSessionState::Connecting);
        r.ctl.stop().await;

        let result = tokio::time::timeout(Duration::from_secs(2), start)
            .await
            .expect("start returned")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(r.ctl.state(), LiveSessionState::Idle);
        assert!(!r.mic.is_held());
        assert!(!r.out.is_open());

        // The late acknowledgement lands nowhere.
        let server = r.transport.server();
        assert!(server.events.send(TransportEvent::Open).await.is_err());
        assert_eq!(r.ctl.state(), LiveSessionState::Idle);
    }

    // ---- streaming ---

    #[tokio::test]
    async fn end_to_end_capture_playback_and_stop() {
        let r = rig();
        r.ctl.start().await.expect("start");
        let mut server = r.transport.server();

        // Two full 4096-sample blocks at 16 kHz → two outbound frames.
        r.mic.push(vec![0.25; 4096 * 2], 16_000);
        for _ in 0..2 {
            let msg = tokio::time::timeout(Duration::from_secs(2), server.inbound.recv())
                .await
                .expect("block sent")
                .expect("connection open");
            match msg {
                ClientMessage::RealtimeInput(media) => {
                    assert_eq!(media.mime_type, "audio/pcm;rate=16000");
                    let pcm = STANDARD.decode(&media.data).unwrap();
                    assert_eq!(pcm.len(), 8192);
                    assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 8192);
                }
                other => panic!("unexpected frame {other:?}"),
            }
        }
        wait_until(|| r.ctl.status().blocks_sent == 2).await;

        // 9600 bytes of 24 kHz PCM → 4800 frames, 0.2 s, scheduled at now.
        r.out.set_time(1.25);
        server.events.send(audio(4800)).await.unwrap();
        wait_until(|| r.out.started().len() == 1).await;

        let started = r.out.started()[0].clone();
        assert_eq!(started.at, 1.25);
        assert_eq!(started.frames, 4800);
        assert_eq!(started.sample_rate, 24_000);
        let st = r.ctl.status();
        assert!(st.speaking);
        assert_eq!(st.segments_scheduled, 1);

        r.ctl.stop().await;
        assert_eq!(r.out.stopped(), vec![started.id]);
        assert!(!r.mic.is_held());
        assert!(!r.out.is_open());
        let st = r.ctl.status();
        assert_eq!(st.state, LiveSessionState::Idle);
        assert!(!st.speaking);
    }

    #[tokio::test]
    async fn inbound_segments_play_back_to_back() {
        let r = rig();
        r.ctl.start().await.expect("start");
        let server = r.transport.server();

        for _ in 0..3 {
            server.events.send(audio(4800)).await.unwrap();
        }
        wait_until(|| r.out.started().len() == 3).await;

        let s = r.out.started();
        assert_eq!(s[0].at, 0.0);
        assert!((s[1].at - (s[0].at + 0.2)).abs() < 1e-9);
        assert!((s[2].at - (s[1].at + 0.2)).abs() < 1e-9);
        r.ctl.stop().await;
    }

    #[tokio::test]
    async fn interruption_silences_and_reanchors_on_clock() {
        let mut r = rig();
        r.ctl.start().await.expect("start");
        let server = r.transport.server();

        server.events.send(audio(4800)).await.unwrap();
        server.events.send(audio(4800)).await.unwrap();
        wait_until(|| r.out.started().len() == 2).await;

        r.out.set_time(0.1);
        server
            .events
            .send(TransportEvent::Server(ServerEvent::Interrupted))
            .await
            .unwrap();
        wait_until(|| r.out.stopped().len() == 2).await;
        wait_until(|| !r.ctl.status().speaking).await;

        server.events.send(audio(2400)).await.unwrap();
        wait_until(|| r.out.started().len() == 3).await;
        assert_eq!(r.out.started()[2].at, 0.1);

        let events = drain(&mut r.events);
        assert!(events.contains(&LiveEvent::Speaking(true)));
        assert!(events.contains(&LiveEvent::Speaking(false)));
        r.ctl.stop().await;
    }

    #[tokio::test]
    async fn speaking_clears_when_last_segment_finishes() {
        let r = rig();
        r.ctl.start().await.expect("start");
        let server = r.transport.server();

        server.events.send(audio(480)).await.unwrap();
        server.events.send(audio(480)).await.unwrap();
        wait_until(|| r.out.started().len() == 2).await;
        let ids: Vec<_> = r.out.started().iter().map(|s| s.id).collect();

        r.out.finish(ids[0]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(r.ctl.status().speaking);

        r.out.finish(ids[1]);
        wait_until(|| !r.ctl.status().speaking).await;
        r.ctl.stop().await;
    }

    #[tokio::test]
    async fn malformed_chunk_is_dropped_and_session_continues() {
        let mut r = rig();
        r.ctl.start().await.expect("start");
        let server = r.transport.server();

        let odd = TransportEvent::Server(ServerEvent::Audio {
            data: STANDARD.encode([0u8; 3]),
            sample_rate: None,
        });
        let garbage = TransportEvent::Server(ServerEvent::Audio {
            data: "***".into(),
            sample_rate: None,
        });
        server.events.send(odd).await.unwrap();
        server.events.send(garbage).await.unwrap();
        server.events.send(audio(4800)).await.unwrap();
        wait_until(|| r.out.started().len() == 1).await;

        let st = r.ctl.status();
        assert_eq!(st.decode_errors, 2);
        assert_eq!(st.segments_scheduled, 1);
        assert_eq!(st.state, LiveSessionState::Open);
        assert!(st.error_message.is_none());
        assert!(!drain(&mut r.events)
            .iter()
            .any(|e| matches!(e, LiveEvent::Error(_))));
        r.ctl.stop().await;
    }

    #[tokio::test]
    async fn transcripts_accumulate_per_turn() {
        let mut r = rig();
        r.ctl.start().await.expect("start");
        let server = r.transport.server();

        for ev in [
            ServerEvent::InputTranscript("hel".into()),
            ServerEvent::InputTranscript("lo".into()),
            ServerEvent::OutputTranscript("hi there".into()),
        ] {
            server.events.send(TransportEvent::Server(ev)).await.unwrap();
        }
        wait_until(|| r.ctl.status().output_transcript == "hi there").await;
        assert_eq!(r.ctl.status().input_transcript, "hello");

        server
            .events
            .send(TransportEvent::Server(ServerEvent::TurnComplete))
            .await
            .unwrap();
        wait_until(|| r.ctl.status().input_transcript.is_empty()).await;
        assert!(r.ctl.status().output_transcript.is_empty());

        let events = drain(&mut r.events);
        assert!(events.contains(&LiveEvent::InputTranscript("lo".into())));
        assert!(events.contains(&LiveEvent::TurnComplete));
        r.ctl.stop().await;
    }

    // ---- remote-initiated endings ---

    #[tokio::test]
    async fn remote_close_tears_down_and_surfaces_error() {
        let mut r = rig();
        r.ctl.start().await.expect("start");
        let server = r.transport.server();
        server.events.send(audio(4800)).await.unwrap();
        wait_until(|| r.out.started().len() == 1).await;

        server
            .events
            .send(TransportEvent::Closed(Some("session expired".into())))
            .await
            .unwrap();
        wait_until(|| r.ctl.state() == LiveSessionState::Idle).await;

        assert!(!r.mic.is_held());
        assert!(!r.out.is_open());
        assert_eq!(r.out.stopped().len(), 1);
        let st = r.ctl.status();
        assert!(!st.listening);
        assert!(!st.speaking);
        assert!(st.error_message.unwrap().contains("session expired"));
        assert!(drain(&mut r.events)
            .iter()
            .any(|e| matches!(e, LiveEvent::Error(m) if m.contains("session expired"))));

        // stop() afterwards is harmless and a fresh session can start.
        r.ctl.stop().await;
        r.ctl.start().await.expect("restart");
        r.ctl.stop().await;
    }

    #[tokio::test]
    async fn transport_error_tears_down() {
        let r = rig();
        r.ctl.start().await.expect("start");
        let server = r.transport.server();
        server
            .events
            .send(TransportEvent::Error("connection reset".into()))
            .await
            .unwrap();
        wait_until(|| r.ctl.state() == LiveSessionState::Idle).await;
        assert!(!r.mic.is_held());
        assert!(r
            .ctl
            .status()
            .error_message
            .unwrap()
            .contains("connection reset"));
    }

    #[tokio::test]
    async fn unplugged_microphone_ends_session_with_device_error() {
        let r = rig();
        r.ctl.start().await.expect("start");
        let _server = r.transport.server();

        r.mic.unplug();
        wait_until(|| r.ctl.state() == LiveSessionState::Idle).await;
        assert!(r
            .ctl
            .status()
            .error_message
            .unwrap()
            .contains("microphone"));
        assert!(!r.out.is_open());
    }
}
