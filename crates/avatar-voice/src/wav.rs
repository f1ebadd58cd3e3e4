//! PCM16 ↔ WAV codec
//!
//! Canonical 44-byte RIFF/WAVE header, 16-bit little-endian PCM payload.
//! Decode tolerates extra chunks by scanning for `data` by name rather than
//! assuming it sits at a fixed offset.

use crate::audio::AudioBuffer;
use crate::error::{VoiceError, VoiceResult};

const HEADER_LEN: usize = 44;

/// Encode a PCM16 buffer as WAV bytes.
///
/// Output is always `44 + 2 * frame_count * channel_count` bytes.
pub fn encode(buffer: &AudioBuffer) -> Vec<u8> {
    let data_len = buffer.samples().len() * 2;
    let channels = buffer.channel_count();
    let sample_rate = buffer.sample_rate_hz();

    let mut bytes = Vec::with_capacity(HEADER_LEN + data_len);
    // RIFF header
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len as u32).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    // fmt subchunk
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes()); // subchunk1 size
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes()); // byte rate
    bytes.extend_from_slice(&(channels * 2).to_le_bytes()); // block align
    bytes.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    // data subchunk
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&(data_len as u32).to_le_bytes());
    for &sample in buffer.samples() {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Decode WAV bytes into a PCM16 buffer.
///
/// Reads the format fields at their canonical offsets (channels at 22,
/// sample rate at 24, bits per sample at 34), then walks the chunk list from
/// offset 12 until it finds `data`. Only 16-bit PCM is accepted; anything
/// else fails with [`VoiceError::UnsupportedFormat`].
pub fn decode(bytes: &[u8]) -> VoiceResult<AudioBuffer> {
    if bytes.len() < HEADER_LEN {
        return Err(VoiceError::UnsupportedFormat(
            "Shorter than a canonical WAV header".to_string(),
        ));
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(VoiceError::UnsupportedFormat(
            "Missing RIFF/WAVE magic".to_string(),
        ));
    }

    let channel_count = u16::from_le_bytes([bytes[22], bytes[23]]);
    let sample_rate_hz = u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]);
    let bits_per_sample = u16::from_le_bytes([bytes[34], bytes[35]]);

    if bits_per_sample != 16 {
        return Err(VoiceError::UnsupportedFormat(format!(
            "{} bits per sample, only 16 supported",
            bits_per_sample
        )));
    }
    if channel_count == 0 || sample_rate_hz == 0 {
        return Err(VoiceError::UnsupportedFormat(
            "Zero channel count or sample rate in fmt chunk".to_string(),
        ));
    }

    // Chunk scan: 4-byte ID + u32 length, data chunk located by name
    let mut pos = 12usize;
    while pos + 8 <= bytes.len() {
        let chunk_id = &bytes[pos..pos + 4];
        let chunk_size =
            u32::from_le_bytes([bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]])
                as usize;
        let body = pos + 8;

        if chunk_id == b"data" {
            let end = body
                .checked_add(chunk_size)
                .filter(|&end| end <= bytes.len())
                .ok_or_else(|| {
                    VoiceError::UnsupportedFormat("Data chunk overruns the payload".to_string())
                })?;
            let mut samples = Vec::with_capacity(chunk_size / 2);
            for pair in bytes[body..end].chunks_exact(2) {
                samples.push(i16::from_le_bytes([pair[0], pair[1]]));
            }
            // drop a ragged tail so only whole frames survive
            let whole = samples.len() - samples.len() % channel_count as usize;
            samples.truncate(whole);
            return AudioBuffer::new(samples, channel_count, sample_rate_hz);
        }

        pos = match body.checked_add(chunk_size) {
            Some(next) => next,
            None => break,
        };
    }

    Err(VoiceError::UnsupportedFormat(
        "No data chunk found".to_string(),
    ))
}
