//! Amplitude-based end-of-utterance detection
//!
//! A windowed mean-absolute-amplitude estimate gates the turn: once the
//! level stays below the threshold for the configured timeout, the utterance
//! is considered finished.

use crate::audio::PCM16_NORMALIZE;
use std::time::Duration;

/// Mean absolute amplitude of a PCM16 window, normalized to [0, 1].
///
/// An empty window reads as 0.0 (silent).
pub fn mean_abs_amplitude(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: u64 = samples.iter().map(|&s| s.unsigned_abs() as u64).sum();
    (sum as f64 / (samples.len() as f64 * PCM16_NORMALIZE as f64)) as f32
}

/// Tracks how long the signal has stayed below the silence threshold.
///
/// The caller feeds it the most recent capture window once per tick together
/// with the elapsed time since the previous tick.
#[derive(Debug)]
pub struct SilenceDetector {
    threshold: f32,
    timeout: Duration,
    quiet_for: Duration,
}

impl SilenceDetector {
    pub fn new(threshold: f32, timeout: Duration) -> Self {
        Self {
            threshold,
            timeout,
            quiet_for: Duration::ZERO,
        }
    }

    /// Observe one window of recent samples.
    ///
    /// Returns `true` exactly once, at the call where the accumulated quiet
    /// time first reaches the timeout; the accumulator then re-arms. Any
    /// window at or above the threshold resets the accumulator.
    pub fn observe(&mut self, samples: &[i16], elapsed: Duration) -> bool {
        let level = mean_abs_amplitude(samples);
        if level < self.threshold {
            self.quiet_for += elapsed;
            if self.quiet_for >= self.timeout {
                self.quiet_for = Duration::ZERO;
                return true;
            }
        } else {
            self.quiet_for = Duration::ZERO;
        }
        false
    }

    /// Re-arm the accumulator, e.g. when a new recording starts
    pub fn reset(&mut self) {
        self.quiet_for = Duration::ZERO;
    }
}
