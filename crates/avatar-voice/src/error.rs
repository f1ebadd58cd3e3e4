//! Error types for the avatar voice loop

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the conversation loop
#[derive(Error, Debug)]
pub enum VoiceError {
    /// Nothing was recorded at the moment the capture was stopped
    #[error("Nothing captured at stop time")]
    CaptureEmpty,

    /// Network error, non-success status, or unparseable response body
    #[error("Webhook exchange failed: {0}")]
    TransportFailure(String),

    /// Response parsed but carried no reply audio
    #[error("Reply contained no audio")]
    MissingReplyAudio,

    /// Reply audio decoded as neither WAV nor the fallback format
    #[error("Reply audio decode failed: {0}")]
    DecodeFailure(String),

    /// WAV payload with an unsupported layout or bit depth
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio stream error: {0}")]
    AudioStream(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}
