//! Live session state machine and shared status.
//!
//! [`LiveSessionState`] is owned by the controller.  Everything a UI needs to
//! render the session (connection phase, listening / speaking flags, running
//! transcripts, counters) lives in [`LiveStatus`], shared as
//! [`SharedStatus`] (`Arc<Mutex<LiveStatus>>`).  Changes are also pushed as
//! [`LiveEvent`]s so a front-end does not have to poll.

use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// LiveSessionState
// ---------------------------------------------------------------------------

/// Phases of one live session.
///
/// ```text
/// Idle ──start()──▶ Connecting ──setup acknowledged──▶ Open
///                   │                                   │
///                   └─ device / handshake error ─┐      ├─ stop()
///                                                ▼      ├─ remote close / error
///                                             Closed ◀──┘
///                                                │
///                                                ▼
///                                              Idle
/// ```
///
/// `Closing` is held while resources are being released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LiveSessionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl LiveSessionState {
    /// `true` for every state except `Idle`; `start()` is refused while active.
    ///
    /// ```
    /// use sobjanta_live::live::LiveSessionState;
    ///
    /// assert!(!LiveSessionState::Idle.is_active());
    /// assert!(LiveSessionState::Connecting.is_active());
    /// assert!(LiveSessionState::Open.is_active());
    /// ```
    pub fn is_active(&self) -> bool {
        !matches!(self, LiveSessionState::Idle)
    }

    /// A short human-readable label for status displays.
    pub fn label(&self) -> &'static str {
        match self {
            LiveSessionState::Idle => "Idle",
            LiveSessionState::Connecting => "Connecting",
            LiveSessionState::Open => "Live",
            LiveSessionState::Closing => "Closing",
            LiveSessionState::Closed => "Closed",
        }
    }
}

// ---------------------------------------------------------------------------
// LiveStatus
// ---------------------------------------------------------------------------

/// Snapshot of everything observable about the current (or last) session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveStatus {
    pub state: LiveSessionState,

    /// Microphone audio is being streamed to the model.
    pub listening: bool,

    /// At least one reply segment is scheduled or playing.
    pub speaking: bool,

    /// What the model heard in the current turn.
    pub input_transcript: String,

    /// What the model is saying in the current turn.
    pub output_transcript: String,

    /// Last user-facing error; cleared by the next `start()`.
    pub error_message: Option<String>,

    /// Incremented on every `start()` and `stop()`.  Work tagged with an older
    /// generation is discarded.
    pub generation: u64,

    pub blocks_sent: u64,
    pub blocks_dropped: u64,
    pub segments_scheduled: u64,
    pub decode_errors: u64,
}

impl LiveStatus {
    /// Clear per-session fields ahead of a new session.
    pub(crate) fn reset_session(&mut self) {
        self.listening = false;
        self.speaking = false;
        self.input_transcript.clear();
        self.output_transcript.clear();
        self.error_message = None;
        self.blocks_sent = 0;
        self.blocks_dropped = 0;
        self.segments_scheduled = 0;
        self.decode_errors = 0;
    }
}

/// Thread-safe handle to [`LiveStatus`].
///
/// Lock for a short critical section; never hold the lock across `.await`.
pub type SharedStatus = Arc<Mutex<LiveStatus>>;

pub fn new_shared_status() -> SharedStatus {
    Arc::new(Mutex::new(LiveStatus::default()))
}

// ---------------------------------------------------------------------------
// LiveEvent
// ---------------------------------------------------------------------------

/// Notifications emitted by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    StateChanged(LiveSessionState),
    Listening(bool),
    Speaking(bool),
    /// Incremental transcript of the user's speech.
    InputTranscript(String),
    /// Incremental transcript of the model's speech.
    OutputTranscript(String),
    /// The model finished its turn; transcripts were reset.
    TurnComplete,
    /// A device or connection failure ended the session.
    Error(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
