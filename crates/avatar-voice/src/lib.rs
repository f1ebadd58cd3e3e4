//! # Avatar Voice - Webhook-Driven Conversation Loop
//!
//! This crate implements the spoken turn-taking loop for an interactive
//! avatar: record the visitor until they go quiet, ship the utterance to a
//! conversational webhook as base64 WAV, then play the reply while the
//! avatar acts out the animation cue that came with it. The loop runs
//! indefinitely and self-heals back to listening after any failed turn.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  Conversation Turn Machine                   │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │   Mic In     │→ │   Silence    │→ │  WAV + b64   │       │
//! │  │   (cpal)     │  │   Detector   │  │   Webhook    │       │
//! │  └──────────────┘  └──────────────┘  └──────┬───────┘       │
//! │         ↑                                   ↓               │
//! │  ┌──────┴───────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │ Resume Delay │← │  Audio Out   │← │ Cue Dispatch │       │
//! │  │              │  │   (rodio)    │  │ (animation)  │       │
//! │  └──────────────┘  └──────────────┘  └──────────────┘       │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod capture;
pub mod config;
pub mod cue;
pub mod error;
pub mod playback;
pub mod silence;
pub mod transport;
pub mod turn;
pub mod wav;

pub use audio::{f32_to_pcm16, AudioBuffer};
pub use capture::{CaptureBackend, CpalCapture};
pub use config::VoiceConfig;
pub use cue::{AnimationBackend, AnimationCue, NullAnimation};
pub use error::{VoiceError, VoiceResult};
pub use playback::{FallbackDecoder, OutputBackend, RodioDecoder, RodioOutput};
pub use silence::{mean_abs_amplitude, SilenceDetector};
pub use transport::{ConversationTransport, ReplyEnvelope, WebhookTransport, WireEnvelope};
pub use turn::{ConversationEvent, ConversationTurnMachine, TurnState};
