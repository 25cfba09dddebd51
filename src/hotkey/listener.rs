//! Dedicated OS-thread hotkey listener using `rdev::listen`.
//!
//! # Shutdown caveat
//!
//! `rdev::listen` has no graceful shutdown API.  Dropping the
//! [`HotkeyListener`] sets a stop flag so nothing more is forwarded, but the
//! OS thread stays blocked in the rdev event loop until the process exits.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::mpsc;

use super::HotkeyEvent;

// ---------------------------------------------------------------------------
// PressEdge
// ---------------------------------------------------------------------------

/// Turns a stream of raw press/release events for one key into single
/// press edges.
///
/// Most platforms repeat `KeyPress` while a key is held; only the first
/// press after a release counts.
#[derive(Debug, Default)]
pub struct PressEdge {
    held: bool,
}

impl PressEdge {
    /// Returns `true` if this press starts a new activation.
    pub fn press(&mut self) -> bool {
        !std::mem::replace(&mut self.held, true)
    }

    pub fn release(&mut self) {
        self.held = false;
    }
}

// ---------------------------------------------------------------------------
// HotkeyListener
// ---------------------------------------------------------------------------

/// Handle to a running hotkey listener thread.
pub struct HotkeyListener {
    stop: Arc<AtomicBool>,
    _thread: std::thread::JoinHandle<()>,
}

impl HotkeyListener {
    /// Spawn the listener thread.  Every fresh press of `key` sends
    /// [`HotkeyEvent::ToggleLive`] on `tx`.
    ///
    /// # Errors
    ///
    /// Fails only if the OS refuses to create the thread.
    pub fn start(key: rdev::Key, tx: mpsc::Sender<HotkeyEvent>) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("hotkey-listener".into())
            .spawn(move || {
                let mut edge = PressEdge::default();
                let result = rdev::listen(move |event| {
                    if stop_clone.load(Ordering::Relaxed) {
                        return;
                    }

                    match event.event_type {
                        rdev::EventType::KeyPress(k) if k == key => {
                            if edge.press() {
                                // blocking_send is safe to call from non-async threads.
                                let _ = tx.blocking_send(HotkeyEvent::ToggleLive);
                            }
                        }
                        rdev::EventType::KeyRelease(k) if k == key => edge.release(),
                        _ => {}
                    }
                });

                if let Err(e) = result {
                    log::error!("hotkey-listener: rdev::listen exited with error: {:?}", e);
                }
            })?;

        log::info!("hotkey: listening for {key:?}");
        Ok(Self {
            stop,
            _thread: thread,
        })
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
