//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Every section is `#[serde(default)]`, so a partial `settings.toml` only
//! overrides what it names.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::AppPaths;
use crate::transport::TransportConfig;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// A setting is outside the range the session can run with.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("session.endpoint must be a ws:// or wss:// URL, got {0:?}")]
    Endpoint(String),

    #[error("session.wrap_up_notice_secs ({notice}) must be below time_limit_secs ({limit})")]
    WrapUp { notice: u64, limit: u64 },
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// What to ask of the live endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// WebSocket URL of the bidirectional live endpoint.
    pub endpoint: String,
    /// Model identifier (with or without the `models/` prefix).
    pub model: String,
    /// Prebuilt voice for model speech (e.g. `"Zephyr"`).
    pub voice: String,
    /// Requested response modalities, normally just `["AUDIO"]`.
    pub response_modalities: Vec<String>,
    /// Transcribe microphone audio.
    pub input_transcription: bool,
    /// Transcribe model speech.
    pub output_transcription: bool,
    /// Text sent once, right after the first successful connect.
    pub opening_message: Option<String>,
    /// Hard session length in seconds.  `None` means unlimited.
    pub time_limit_secs: Option<u64>,
    /// How long before the limit the wrap-up message is sent.
    pub wrap_up_notice_secs: u64,
    /// Text sent when the wrap-up notice fires.
    pub wrap_up_message: String,
    /// Seconds to wait for the endpoint to acknowledge setup.
    pub setup_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let transport = TransportConfig::default();
        Self {
            endpoint: transport.endpoint,
            model: transport.model,
            voice: transport.voice,
            response_modalities: transport.response_modalities,
            input_transcription: true,
            output_transcription: true,
            opening_message: None,
            time_limit_secs: None,
            wrap_up_notice_secs: 30,
            wrap_up_message: "[SYSTEM: 30 seconds remaining. Start wrapping up the \
                              conversation naturally.]"
                .into(),
            setup_timeout_secs: transport.setup_timeout_secs,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Sample rates and framing for the capture and playback paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate of captured frames sent to the endpoint, in Hz.
    pub input_sample_rate: u32,
    /// Rate of model speech received from the endpoint, in Hz.
    pub output_sample_rate: u32,
    /// Channel count of received PCM.
    pub output_channels: u16,
    /// Samples per captured frame.
    pub block_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            output_channels: 1,
            block_size: 4096,
        }
    }
}

// ---------------------------------------------------------------------------
// ReconnectConfig
// ---------------------------------------------------------------------------

/// Backoff applied when the connection drops mid-session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Growth factor between consecutive retries.
    pub multiplier: u32,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Retries after the first failure before the session gives up.
    pub max_retries: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2_000,
            multiplier: 2,
            max_delay_ms: 5_000,
            max_retries: 3,
        }
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// AuthConfig
// ---------------------------------------------------------------------------

/// Where the API key comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Environment variable holding the key.
    pub api_key_env: String,
    /// Key stored in the settings file.  Takes precedence over the env var.
    pub api_key: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key_env: "GEMINI_API_KEY".into(),
            api_key: None,
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
/// use live_coach::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // First run: write the defaults out so they can be edited
/// // let config = AppConfig::load_or_create().unwrap();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub audio: AudioConfig,
    pub reconnect: ReconnectConfig,
    pub auth: AuthConfig,
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
        Ok(config)
    }

    /// Like [`load`](Self::load), but on first run also writes the defaults
    /// to `settings.toml` so the user has a file to edit.
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_at(&AppPaths::new().settings_file)
    }

    /// [`load_or_create`](Self::load_or_create) against an explicit path.
    pub fn load_or_create_at(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            return Self::load_from(path);
        }
        let config = Self::default();
        config.save_to(path)?;
        log::info!("config: wrote default settings to {}", path.display());
        Ok(config)
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

    /// Reject settings the session cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.session.endpoint.as_str();
        if !(endpoint.starts_with("wss://") || endpoint.starts_with("ws://")) {
            return Err(ConfigError::Endpoint(endpoint.to_string()));
        }
        if self.audio.block_size == 0 {
            return Err(ConfigError::Zero("audio.block_size"));
        }
        if self.audio.input_sample_rate == 0 {
            return Err(ConfigError::Zero("audio.input_sample_rate"));
        }
        if self.audio.output_sample_rate == 0 {
            return Err(ConfigError::Zero("audio.output_sample_rate"));
        }
        if self.audio.output_channels == 0 {
            return Err(ConfigError::Zero("audio.output_channels"));
        }
        if self.reconnect.max_delay_ms == 0 {
            return Err(ConfigError::Zero("reconnect.max_delay_ms"));
        }
        if self.reconnect.multiplier == 0 {
            return Err(ConfigError::Zero("reconnect.multiplier"));
        }
        if let Some(limit) = self.session.time_limit_secs {
            if limit == 0 {
                return Err(ConfigError::Zero("session.time_limit_secs"));
            }
            if self.session.wrap_up_notice_secs >= limit {
                return Err(ConfigError::WrapUp {
                    notice: self.session.wrap_up_notice_secs,
                    limit,
                });
            }
        }
        Ok(())
    }

    /// Connection parameters for one session with `system_instruction` as
    /// the persona.
    pub fn transport_config(&self, system_instruction: &str) -> TransportConfig {
        TransportConfig {
            endpoint: self.session.endpoint.clone(),
            model: self.session.model.clone(),
            system_instruction: system_instruction.to_string(),
            voice: self.session.voice.clone(),
            response_modalities: self.session.response_modalities.clone(),
            input_transcription: self.session.input_transcription,
            output_transcription: self.session.output_transcription,
            setup_timeout_secs: self.session.setup_timeout_secs,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
