//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.
//! Every section is `#[serde(default)]`, so a hand-edited file only needs the
//! keys it wants to override.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::audio::OverflowPolicy;

// ---------------------------------------------------------------------------
// LiveConfig
// ---------------------------------------------------------------------------

/// Settings for the bidirectional streaming session with the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// WebSocket URL of the streaming endpoint (without the `key` query).
    pub endpoint: String,
    /// Model resource name sent in the session setup.
    pub model: String,
    /// API key.  When `None`, the variable named by `api_key_env` is read.
    pub api_key: Option<String>,
    /// Environment variable consulted when `api_key` is unset.
    pub api_key_env: String,
    /// Prebuilt voice used for spoken replies.
    pub voice_name: String,
    /// Persona / behaviour prompt sent once at session start.
    pub system_instruction: Option<String>,
    /// Ask the server to transcribe both sides of the conversation.
    pub transcription: bool,
    /// Upper bound on the websocket + setup handshake.
    pub connect_timeout_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".into(),
            model: "models/gemini-2.5-flash-native-audio-preview-12-2025".into(),
            api_key: None,
            api_key_env: "GEMINI_API_KEY".into(),
            voice_name: "Kore".into(),
            system_instruction: Some(
                "You are Sobjanta, a highly knowledgeable and friendly assistant. \
                 Always answer in clear, standard Bengali and speak to the user \
                 like an old friend."
                    .into(),
            ),
            transcription: true,
            connect_timeout_secs: 15,
        }
    }
}

impl LiveConfig {
    /// The configured key, or the value of `api_key_env` when none is set.
    /// Empty strings count as unset.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for microphone capture and speaker playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate of the PCM streamed to the model (Hz).
    pub input_sample_rate: u32,
    /// Rate of the PCM the model streams back (Hz).
    pub output_sample_rate: u32,
    /// Samples per outbound block.
    pub block_size: usize,
    /// Capacity of the outbound queue, in blocks.
    pub outbound_queue_blocks: usize,
    /// Which block to sacrifice when the outbound queue is full.
    pub overflow_policy: OverflowPolicy,
    /// Input device name; `None` means the system default.
    pub input_device: Option<String>,
    /// Output device name; `None` means the system default.
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: crate::codec::INPUT_SAMPLE_RATE,
            output_sample_rate: crate::codec::OUTPUT_SAMPLE_RATE,
            block_size: crate::audio::CAPTURE_BLOCK_SIZE,
            outbound_queue_blocks: 8,
            overflow_policy: OverflowPolicy::default(),
            input_device: None,
            output_device: None,
        }
    }
}

impl AudioConfig {
    /// Rejects values the capture and playback paths cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.input_sample_rate == 0 {
            anyhow::bail!("audio.input_sample_rate must be greater than 0");
        }
        if self.output_sample_rate == 0 {
            anyhow::bail!("audio.output_sample_rate must be greater than 0");
        }
        if self.block_size == 0 {
            anyhow::bail!("audio.block_size must be greater than 0");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HotkeyConfig
// ---------------------------------------------------------------------------

/// Global hotkey bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeyConfig {
    /// Key that starts a live session when idle and stops it otherwise.
    pub toggle_live_key: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            toggle_live_key: "F9".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use sobjanta_live::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Streaming session settings.
    pub live: LiveConfig,
    /// Capture / playback settings.
    pub audio: AudioConfig,
    /// Global hotkey bindings.
    pub hotkey: HotkeyConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.audio.validate()?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns `true` when no `settings.toml` file exists yet.
    pub fn is_first_run() -> bool {
        !AppPaths::new().settings_file.exists()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
