//! Conversation loop configuration
//!
//! Tunables come from the environment (`AVATAR_*`, usually via `.env`) or a
//! TOML file; unset values fall back to the defaults below. Change behavior
//! without code edits.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

fn default_sample_rate_hz() -> u32 {
    16000
}

fn default_max_record_secs() -> u32 {
    60
}

fn default_silence_threshold() -> f32 {
    0.01
}

fn default_silence_timeout_secs() -> f32 {
    3.0
}

fn default_silence_window() -> usize {
    1024
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_resume_delay_secs() -> f32 {
    2.5
}

fn default_true() -> bool {
    true
}

/// Tunables for the conversation loop.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | AVATAR_WEBHOOK_URL | (required) | Conversational webhook endpoint. |
/// | AVATAR_MIC_DEVICE | system default | Input device name. |
/// | AVATAR_SAMPLE_RATE | 16000 | Capture sample rate in Hz. |
/// | AVATAR_MAX_RECORD_SECS | 60 | Capture buffer ceiling per utterance. |
/// | AVATAR_SILENCE_THRESHOLD | 0.01 | Normalized amplitude below which a window counts as quiet. |
/// | AVATAR_SILENCE_TIMEOUT_SECS | 3.0 | Quiet time that ends the utterance. |
/// | AVATAR_SILENCE_WINDOW | 1024 | Samples per amplitude evaluation window. |
/// | AVATAR_REQUEST_TIMEOUT_SECS | 60 | Webhook HTTP timeout. |
/// | AVATAR_RESUME_DELAY_SECS | 2.5 | Pause between reply playback and re-listening. |
/// | AVATAR_GREET_ON_START | true | Dispatch a waving cue at startup. |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Conversational webhook endpoint; validation rejects an empty value
    #[serde(default)]
    pub webhook_url: String,

    /// Input device name; `None` selects the system default
    #[serde(default)]
    pub mic_device: Option<String>,

    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: u32,

    /// Longest utterance the capture buffer will hold, in seconds
    #[serde(default = "default_max_record_secs")]
    pub max_record_secs: u32,

    /// Normalized amplitude in [0, 1] below which a window counts as quiet
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f32,

    #[serde(default = "default_silence_timeout_secs")]
    pub silence_timeout_secs: f32,

    /// Samples per amplitude evaluation window; larger windows smooth the
    /// estimate at the cost of detection latency
    #[serde(default = "default_silence_window")]
    pub silence_window: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Settle time between the end of reply playback and re-listening
    #[serde(default = "default_resume_delay_secs")]
    pub resume_delay_secs: f32,

    /// Dispatch a one-shot waving cue when the loop starts
    #[serde(default = "default_true")]
    pub greet_on_start: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            mic_device: None,
            sample_rate_hz: default_sample_rate_hz(),
            max_record_secs: default_max_record_secs(),
            silence_threshold: default_silence_threshold(),
            silence_timeout_secs: default_silence_timeout_secs(),
            silence_window: default_silence_window(),
            request_timeout_secs: default_request_timeout_secs(),
            resume_delay_secs: default_resume_delay_secs(),
            greet_on_start: true,
        }
    }
}

impl VoiceConfig {
    /// Load from environment. Unset or invalid values fall back to defaults;
    /// only `AVATAR_WEBHOOK_URL` has no usable default.
    pub fn from_env() -> Self {
        Self {
            webhook_url: std::env::var("AVATAR_WEBHOOK_URL")
                .map(|url| url.trim().to_string())
                .unwrap_or_default(),
            mic_device: env_opt_string("AVATAR_MIC_DEVICE"),
            sample_rate_hz: env_u32("AVATAR_SAMPLE_RATE", default_sample_rate_hz()),
            max_record_secs: env_u32("AVATAR_MAX_RECORD_SECS", default_max_record_secs()),
            silence_threshold: env_f32("AVATAR_SILENCE_THRESHOLD", default_silence_threshold()),
            silence_timeout_secs: env_f32(
                "AVATAR_SILENCE_TIMEOUT_SECS",
                default_silence_timeout_secs(),
            ),
            silence_window: env_usize("AVATAR_SILENCE_WINDOW", default_silence_window()),
            request_timeout_secs: env_u64(
                "AVATAR_REQUEST_TIMEOUT_SECS",
                default_request_timeout_secs(),
            ),
            resume_delay_secs: env_f32("AVATAR_RESUME_DELAY_SECS", default_resume_delay_secs()),
            greet_on_start: env_bool("AVATAR_GREET_ON_START", true),
        }
    }

    /// Parse a TOML document; missing keys fall back to defaults
    pub fn from_toml_str(content: &str) -> VoiceResult<Self> {
        toml::from_str(content).map_err(|e| VoiceError::Config(e.to_string()))
    }

    /// Load a TOML configuration file
    pub fn load_from_path(path: &Path) -> VoiceResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject values the loop cannot run with
    pub fn validate(&self) -> VoiceResult<()> {
        if self.webhook_url.trim().is_empty() {
            return Err(VoiceError::Config(
                "Webhook URL is required (AVATAR_WEBHOOK_URL)".to_string(),
            ));
        }
        if self.sample_rate_hz == 0 {
            return Err(VoiceError::Config("Sample rate must be non-zero".to_string()));
        }
        if self.max_record_secs == 0 {
            return Err(VoiceError::Config(
                "Max recording duration must be non-zero".to_string(),
            ));
        }
        if self.silence_window == 0 {
            return Err(VoiceError::Config(
                "Silence window must be non-zero".to_string(),
            ));
        }
        if !self.silence_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.silence_threshold)
        {
            return Err(VoiceError::Config(format!(
                "Silence threshold {} outside [0, 1]",
                self.silence_threshold
            )));
        }
        if !self.silence_timeout_secs.is_finite() || self.silence_timeout_secs <= 0.0 {
            return Err(VoiceError::Config(
                "Silence timeout must be positive".to_string(),
            ));
        }
        if !self.resume_delay_secs.is_finite() || self.resume_delay_secs < 0.0 {
            return Err(VoiceError::Config(
                "Resume delay must not be negative".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(VoiceError::Config(
                "Request timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.silence_timeout_secs)
    }

    pub fn max_record_duration(&self) -> Duration {
        Duration::from_secs(self.max_record_secs as u64)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_secs_f32(self.resume_delay_secs)
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) if v.trim().is_empty() => default,
        Ok(v) => v.trim().eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_u32(name: &str, default: u32) -> u32 {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_f32(name: &str, default: f32) -> f32 {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}
