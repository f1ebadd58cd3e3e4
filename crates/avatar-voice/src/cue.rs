//! Animation cues
//!
//! The remote service can name an expressive animation alongside its reply
//! audio. The core only parses the token and hands a symbolic cue to an
//! injected dispatcher; how the cue is visually realized is not its concern.

use std::fmt;
use tracing::warn;

/// Closed vocabulary of expressive cues understood by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationCue {
    Waving,
    IdleArms,
    IdleShy,
    /// Reset pose, also the mapping for unknown tokens
    Neutral,
}

impl AnimationCue {
    /// Parse a cue token, case-insensitive and trimmed.
    ///
    /// Unknown tokens log a warning and map to [`AnimationCue::Neutral`].
    pub fn parse(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "waving" => AnimationCue::Waving,
            "idlearms" => AnimationCue::IdleArms,
            "idleshy" => AnimationCue::IdleShy,
            "none" => AnimationCue::Neutral,
            other => {
                warn!(token = other, "Unknown animation cue, using neutral");
                AnimationCue::Neutral
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnimationCue::Waving => "waving",
            AnimationCue::IdleArms => "idlearms",
            AnimationCue::IdleShy => "idleshy",
            AnimationCue::Neutral => "neutral",
        }
    }
}

impl fmt::Display for AnimationCue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for animation cues, implemented by the embedding platform
pub trait AnimationBackend {
    fn dispatch(&self, cue: AnimationCue);
}

/// No-op dispatcher for headless runs and tests
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAnimation;

impl NullAnimation {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AnimationBackend for NullAnimation {
    fn dispatch(&self, _cue: AnimationCue) {}
}
