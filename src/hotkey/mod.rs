//! Global toggle hotkey for the live session, backed by `rdev`.
//!
//! `rdev::listen()` blocks its thread for the life of the process, so it runs
//! on a dedicated OS thread.  [`HotkeyListener::start`] spawns that thread and
//! forwards one [`HotkeyEvent::ToggleLive`] per physical key press; OS
//! auto-repeat while the key is held is filtered out by [`PressEdge`].
//!
//! # Usage
//!
//! ```no_run
//! use tokio::sync::mpsc;
//! use sobjanta_live::hotkey::{parse_key, HotkeyEvent, HotkeyListener};
//!
//! let (tx, mut rx) = mpsc::channel(16);
//! let key = parse_key("F9").expect("unknown key");
//! let _listener = HotkeyListener::start(key, tx).expect("hotkey thread");
//!
//! // In your async loop:
//! // while let Some(HotkeyEvent::ToggleLive) = rx.recv().await { ... }
//! ```

pub mod listener;

pub use listener::{HotkeyListener, PressEdge};

// ---------------------------------------------------------------------------
// HotkeyEvent
// ---------------------------------------------------------------------------

/// Events emitted by the hotkey listener thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEvent {
    /// Start the live session if idle, otherwise stop it.
    ToggleLive,
}

// ---------------------------------------------------------------------------
// parse_key
// ---------------------------------------------------------------------------

/// Parse a key name from the config into an [`rdev::Key`].
///
/// Accepts F1–F12, a handful of named keys and single ASCII letters in either
/// case.  Returns `None` for anything else.
///
/// ```
/// use sobjanta_live::hotkey::parse_key;
///
/// assert_eq!(parse_key("F9"),    Some(rdev::Key::F9));
/// assert_eq!(parse_key("Pause"), Some(rdev::Key::Pause));
/// assert_eq!(parse_key("l"),     Some(rdev::Key::KeyL));
/// assert_eq!(parse_key("Ctrl+L"), None);
/// ```
pub fn parse_key(name: &str) -> Option<rdev::Key> {
    use rdev::Key;

    let key = match name {
        "F1" => Key::F1,
        "F2" => Key::F2,
        "F3" => Key::F3,
        "F4" => Key::F4,
        "F5" => Key::F5,
        "F6" => Key::F6,
        "F7" => Key::F7,
        "F8" => Key::F8,
        "F9" => Key::F9,
        "F10" => Key::F10,
        "F11" => Key::F11,
        "F12" => Key::F12,
        "Escape" | "Esc" => Key::Escape,
        "Space" => Key::Space,
        "Pause" => Key::Pause,
        "ScrollLock" => Key::ScrollLock,
        "PrintScreen" => Key::PrintScreen,
        "Insert" => Key::Insert,
        "Home" => Key::Home,
        "End" => Key::End,
        _ => return parse_letter(name),
    };
    Some(key)
}

fn parse_letter(name: &str) -> Option<rdev::Key> {
    use rdev::Key;

    const LETTERS: [Key; 26] = [
        Key::KeyA, Key::KeyB, Key::KeyC, Key::KeyD, Key::KeyE, Key::KeyF, Key::KeyG,
        Key::KeyH, Key::KeyI, Key::KeyJ, Key::KeyK, Key::KeyL, Key::KeyM, Key::KeyN,
        Key::KeyO, Key::KeyP, Key::KeyQ, Key::KeyR, Key::KeyS, Key::KeyT, Key::KeyU,
        Key::KeyV, Key::KeyW, Key::KeyX, Key::KeyY, Key::KeyZ,
    ];

    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => {
            let index = (c.to_ascii_uppercase() as u8 - b'A') as usize;
            Some(LETTERS[index])
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
