//! Reply playback
//!
//! Playback runs through the [`OutputBackend`] trait so the machine can be
//! tested without an audio device. Starting a new buffer always stops
//! whatever is currently playing; two replies never overlap.
//! [`FallbackDecoder`] covers reply audio that is not WAV (e.g. MP3).

use crate::audio::AudioBuffer;
use crate::error::{VoiceError, VoiceResult};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::io::Cursor;
use tracing::{debug, info};

/// Audio output capability consumed by the turn machine
pub trait OutputBackend {
    /// Start playing a buffer, stopping any current playback first.
    fn play(&self, buffer: &AudioBuffer) -> VoiceResult<()>;

    /// Stop immediately and drop anything queued.
    fn stop(&self);

    /// Whether audio is still queued or audible.
    fn is_playing(&self) -> bool;
}

/// Speaker adapter over a rodio sink on the default output device.
///
/// PCM16 is converted to normalized f32 here, at the playback boundary.
pub struct RodioOutput {
    _stream: OutputStream,
    _stream_handle: OutputStreamHandle,
    sink: Sink,
}

impl RodioOutput {
    pub fn new() -> VoiceResult<Self> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| VoiceError::Playback(e.to_string()))?;
        let sink = Sink::try_new(&stream_handle)
            .map_err(|e| VoiceError::Playback(e.to_string()))?;
        info!("🔊 Audio output ready");
        Ok(Self {
            _stream: stream,
            _stream_handle: stream_handle,
            sink,
        })
    }
}

impl OutputBackend for RodioOutput {
    fn play(&self, buffer: &AudioBuffer) -> VoiceResult<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        self.sink.stop();
        let source = SamplesBuffer::new(
            buffer.channel_count(),
            buffer.sample_rate_hz(),
            buffer.samples_f32(),
        );
        self.sink.append(source);
        Ok(())
    }

    fn stop(&self) {
        self.sink.stop();
        debug!("Playback stopped");
    }

    fn is_playing(&self) -> bool {
        !self.sink.empty()
    }
}

/// Decoder for reply audio in the compressed fallback format
pub trait FallbackDecoder {
    fn decode(&self, bytes: &[u8]) -> VoiceResult<AudioBuffer>;
}

/// Fallback decode over rodio's container decoder (MP3 and friends).
///
/// Works purely on bytes; no output device or temporary file involved.
#[derive(Debug, Default)]
pub struct RodioDecoder;

impl RodioDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FallbackDecoder for RodioDecoder {
    fn decode(&self, bytes: &[u8]) -> VoiceResult<AudioBuffer> {
        let cursor = Cursor::new(bytes.to_vec());
        let source =
            rodio::Decoder::new(cursor).map_err(|e| VoiceError::DecodeFailure(e.to_string()))?;
        let channel_count = source.channels();
        let sample_rate_hz = source.sample_rate();
        let mut samples: Vec<i16> = source.collect();
        if samples.is_empty() {
            return Err(VoiceError::DecodeFailure(
                "Decoded to zero samples".to_string(),
            ));
        }
        let whole = samples.len() - samples.len() % channel_count as usize;
        samples.truncate(whole);
        AudioBuffer::new(samples, channel_count, sample_rate_hz)
    }
}
