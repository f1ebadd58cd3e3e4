//! Webhook transport
//!
//! One JSON POST per turn: the captured WAV (base64) plus format metadata
//! out, reply audio (base64) plus an optional animation cue back. Network
//! errors, non-2xx statuses, and unparseable bodies all collapse into
//! [`VoiceError::TransportFailure`]; the turn machine treats them alike.

use crate::audio::AudioBuffer;
use crate::error::{VoiceError, VoiceResult};
use crate::wav;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Request payload for the conversational webhook
#[derive(Debug, Clone, Serialize)]
pub struct WireEnvelope {
    /// Base64-encoded PCM16 WAV
    pub audio: String,
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
    pub channels: u16,
}

impl WireEnvelope {
    /// Encode a captured utterance for upload
    pub fn from_buffer(buffer: &AudioBuffer) -> Self {
        Self {
            audio: BASE64.encode(wav::encode(buffer)),
            sample_rate: buffer.sample_rate_hz(),
            channels: buffer.channel_count(),
        }
    }
}

/// Response payload from the conversational webhook
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyEnvelope {
    /// Base64-encoded reply audio, WAV or the compressed fallback format
    #[serde(default)]
    pub audio: Option<String>,
    /// Animation cue token; absent means no cue
    #[serde(default)]
    pub animation: Option<String>,
}

impl ReplyEnvelope {
    /// Decode the base64 reply audio.
    ///
    /// A missing or blank field is [`VoiceError::MissingReplyAudio`];
    /// undecodable base64 counts as a malformed body.
    pub fn decode_audio(&self) -> VoiceResult<Vec<u8>> {
        let encoded = self
            .audio
            .as_deref()
            .map(str::trim)
            .filter(|audio| !audio.is_empty())
            .ok_or(VoiceError::MissingReplyAudio)?;
        BASE64
            .decode(encoded)
            .map_err(|e| VoiceError::TransportFailure(format!("Bad base64 audio: {}", e)))
    }

    /// The cue token, if one was sent and is non-empty
    pub fn cue_token(&self) -> Option<&str> {
        self.animation
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

/// One upload/response exchange with the remote conversational service
#[async_trait]
pub trait ConversationTransport: Send + Sync {
    async fn send(&self, envelope: WireEnvelope) -> VoiceResult<ReplyEnvelope>;
}

/// Production transport: a single JSON POST to the configured webhook
pub struct WebhookTransport {
    url: String,
    client: reqwest::Client,
}

impl WebhookTransport {
    /// Build a transport with a bounded request timeout; expiry surfaces as
    /// [`VoiceError::TransportFailure`] like any other network fault.
    pub fn new(url: impl Into<String>, timeout: Duration) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::TransportFailure(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl ConversationTransport for WebhookTransport {
    async fn send(&self, envelope: WireEnvelope) -> VoiceResult<ReplyEnvelope> {
        debug!(
            audio_chars = envelope.audio.len(),
            sample_rate = envelope.sample_rate,
            channels = envelope.channels,
            "Uploading utterance"
        );

        let response = self
            .client
            .post(&self.url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| VoiceError::TransportFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VoiceError::TransportFailure(format!(
                "Webhook returned {}",
                status
            )));
        }

        response
            .json::<ReplyEnvelope>()
            .await
            .map_err(|e| VoiceError::TransportFailure(format!("Bad reply body: {}", e)))
    }
}
