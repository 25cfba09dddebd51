//! Application entry point — Sobjanta live voice assistant.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Build the websocket transport (needs an API key).
//! 4. Build the [`LiveSessionController`] over the cpal microphone/speaker.
//! 5. Spawn the hotkey listener thread.
//! 6. Toggle the session on each hotkey press until Ctrl-C.

use std::sync::Arc;

use tokio::sync::mpsc;
use sobjanta_live::{
    audio::CpalInput,
    config::AppConfig,
    hotkey::{parse_key, HotkeyEvent, HotkeyListener},
    live::{LiveEvent, LiveSessionController, LiveSessionState, WebSocketTransport},
    playback::CpalOutput,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Sobjanta live starting up");

    // 2. Configuration
    if AppConfig::is_first_run() {
        log::info!("No settings file found; writing defaults");
        if let Err(e) = AppConfig::default().save() {
            log::warn!("Failed to write default config: {e}");
        }
    }
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Transport
    let transport = WebSocketTransport::from_config(&config.live).map_err(|e| {
        anyhow::anyhow!("{e}; set `live.api_key` in settings.toml or ${}", config.live.api_key_env)
    })?;

    // 4. Controller
    let input = CpalInput::new(config.audio.input_device.clone());
    let output = CpalOutput::new(config.audio.output_device.clone());
    let hotkey_name = config.hotkey.toggle_live_key.clone();
    let (controller, mut events) = LiveSessionController::new(
        config,
        Arc::new(input),
        Arc::new(output),
        Arc::new(transport),
    );
    let controller = Arc::new(controller);

    // 5. Hotkey listener thread
    let key = parse_key(&hotkey_name).unwrap_or_else(|| {
        log::warn!("Unknown hotkey {hotkey_name:?}; falling back to F9");
        rdev::Key::F9
    });
    let (hotkey_tx, mut hotkey_rx) = mpsc::channel::<HotkeyEvent>(16);
    let _hotkey_listener = HotkeyListener::start(key, hotkey_tx)?;
    log::info!("Press {hotkey_name} to start or stop a live session; Ctrl-C to quit");

    // 6. Event loop
    loop {
        tokio::select! {
            Some(HotkeyEvent::ToggleLive) = hotkey_rx.recv() => {
                let controller = Arc::clone(&controller);
                if controller.state() == LiveSessionState::Idle {
                    // start() waits for the handshake; keep the hotkey responsive.
                    tokio::spawn(async move {
                        if let Err(e) = controller.start().await {
                            log::error!("Could not start live session: {e}");
                        }
                    });
                } else {
                    controller.stop().await;
                }
            }

            Some(event) = events.recv() => print_event(&event),

            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down");
                break;
            }
        }
    }

    controller.stop().await;
    Ok(())
}

fn print_event(event: &LiveEvent) {
    match event {
        LiveEvent::StateChanged(state) => println!("[{}]", state.label()),
        LiveEvent::Listening(true) => println!("listening…"),
        LiveEvent::Speaking(true) => println!("speaking…"),
        LiveEvent::Listening(false) | LiveEvent::Speaking(false) => {}
        LiveEvent::InputTranscript(text) => println!("you: {text}"),
        LiveEvent::OutputTranscript(text) => println!("sobjanta: {text}"),
        LiveEvent::TurnComplete => println!("--"),
        LiveEvent::Error(msg) => eprintln!("error: {msg}"),
    }
}
