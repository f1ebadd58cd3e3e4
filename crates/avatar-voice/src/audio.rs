//! PCM16 audio buffers
//!
//! The whole pipeline carries interleaved signed 16-bit samples; conversion
//! to normalized float happens only at the playback boundary.

use crate::error::{VoiceError, VoiceResult};
use std::time::Duration;

/// Scale factor when normalizing PCM16 to [-1.0, 1.0]
pub const PCM16_NORMALIZE: f32 = 32768.0;

/// Scale factor when converting normalized float to PCM16
pub const PCM16_SCALE: f32 = 32767.0;

/// An immutable chunk of interleaved PCM16 audio plus its format metadata.
///
/// Produced by capture trim or by decode, then handed forward through the
/// pipeline; stages transfer ownership rather than sharing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    samples: Vec<i16>,
    channel_count: u16,
    sample_rate_hz: u32,
}

impl AudioBuffer {
    /// Create a new buffer, validating the interleave invariant
    /// (`samples.len() == frame_count * channel_count`).
    pub fn new(samples: Vec<i16>, channel_count: u16, sample_rate_hz: u32) -> VoiceResult<Self> {
        if channel_count == 0 {
            return Err(VoiceError::Config(
                "Audio buffer needs at least one channel".to_string(),
            ));
        }
        if sample_rate_hz == 0 {
            return Err(VoiceError::Config(
                "Audio buffer sample rate must be non-zero".to_string(),
            ));
        }
        if samples.len() % channel_count as usize != 0 {
            return Err(VoiceError::Config(format!(
                "Sample count {} is not a whole number of {}-channel frames",
                samples.len(),
                channel_count
            )));
        }

        Ok(Self {
            samples,
            channel_count,
            sample_rate_hz,
        })
    }

    /// Interleaved PCM16 samples
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    /// Samples per channel
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channel_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback length of the buffer
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate_hz as f64)
    }

    /// Convert to normalized f32 samples for the playback boundary
    pub fn samples_f32(&self) -> Vec<f32> {
        self.samples
            .iter()
            .map(|&s| s as f32 / PCM16_NORMALIZE)
            .collect()
    }
}

/// Convert normalized f32 samples to PCM16, clamping out-of-range values
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * PCM16_SCALE).round() as i16)
        .collect()
}
