//! Turn-taking state machine for the conversation loop
//!
//! Drives one full exchange at a time: listen until the speaker goes quiet,
//! ship the utterance to the webhook, play the reply while the avatar acts
//! out its cue, then listen again. The machine owns the capture, transport,
//! playback and animation backends and is advanced by an external `tick`
//! cadence so a render loop can host it without blocking.
//!
//! Every failure path lands back in `Recording`; the loop never stops on its
//! own. `Error` is only observable while the microphone itself refuses to
//! restart, and each tick retries it.

use crate::audio::AudioBuffer;
use crate::capture::CaptureBackend;
use crate::config::VoiceConfig;
use crate::cue::{AnimationBackend, AnimationCue};
use crate::error::{VoiceError, VoiceResult};
use crate::playback::{FallbackDecoder, OutputBackend};
use crate::silence::SilenceDetector;
use crate::transport::{ConversationTransport, ReplyEnvelope, WireEnvelope};
use crate::wav;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Observable phase of the conversation loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Not started yet, or shut down
    Idle,
    /// Microphone open, watching for the utterance to end
    Recording,
    /// Utterance encoded and in flight to the webhook
    Uploading,
    /// Reply arrived, decode and cue dispatch pending
    AwaitingReply,
    /// Reply audio on the speaker (includes the settle delay afterwards)
    Playing,
    /// Microphone restart failed; retried every tick
    Error,
}

impl TurnState {
    pub fn name(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::Recording => "recording",
            TurnState::Uploading => "uploading",
            TurnState::AwaitingReply => "awaiting_reply",
            TurnState::Playing => "playing",
            TurnState::Error => "error",
        }
    }
}

/// Events emitted by the turn machine
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    /// Microphone opened, loop is listening
    ListeningStarted {
        timestamp: DateTime<Utc>,
    },

    /// An utterance was finalized and handed to the transport
    UtteranceCaptured {
        timestamp: DateTime<Utc>,
        frames: u64,
        duration: Duration,
    },

    /// Webhook answered; cue is dispatched before playback starts
    ReplyReceived {
        timestamp: DateTime<Utc>,
        cue: Option<AnimationCue>,
        audio_bytes: usize,
    },

    /// Reply audio started on the speaker
    PlaybackStarted {
        timestamp: DateTime<Utc>,
    },

    /// Reply audio drained from the speaker
    PlaybackFinished {
        timestamp: DateTime<Utc>,
    },

    /// A turn was abandoned; the loop goes back to listening
    TurnFailed {
        timestamp: DateTime<Utc>,
        reason: String,
    },
}

/// Owns one conversation exchange at a time and the devices it runs on.
///
/// At most one of capture, upload and playback is active in any state.
/// Not `Send`: the capture stream and audio sink must stay on the thread
/// that created them, so the host drives `tick` from that thread.
pub struct ConversationTurnMachine {
    config: VoiceConfig,
    state: TurnState,

    // Injected backends
    capture: Box<dyn CaptureBackend>,
    transport: Arc<dyn ConversationTransport>,
    output: Box<dyn OutputBackend>,
    fallback: Box<dyn FallbackDecoder>,
    animation: Box<dyn AnimationBackend>,

    // Recording phase
    silence: SilenceDetector,
    window_cursor: u64,
    recorded: Duration,

    // Upload phase
    upload_task: Option<JoinHandle<()>>,
    reply_rx: Option<oneshot::Receiver<VoiceResult<ReplyEnvelope>>>,
    reply: Option<ReplyEnvelope>,

    // Playback phase: `Some` once the sink drained, counts up to the
    // resume delay before listening restarts
    resume_wait: Option<Duration>,

    event_tx: mpsc::UnboundedSender<ConversationEvent>,
}

impl ConversationTurnMachine {
    /// Create a machine over the given backends. Validates the configuration
    /// up front; everything after this point self-heals instead of erroring.
    pub fn new(
        config: VoiceConfig,
        capture: Box<dyn CaptureBackend>,
        transport: Arc<dyn ConversationTransport>,
        output: Box<dyn OutputBackend>,
        fallback: Box<dyn FallbackDecoder>,
        animation: Box<dyn AnimationBackend>,
    ) -> VoiceResult<(Self, mpsc::UnboundedReceiver<ConversationEvent>)> {
        config.validate()?;

        let silence = SilenceDetector::new(config.silence_threshold, config.silence_timeout());
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let machine = Self {
            config,
            state: TurnState::Idle,
            capture,
            transport,
            output,
            fallback,
            animation,
            silence,
            window_cursor: 0,
            recorded: Duration::ZERO,
            upload_task: None,
            reply_rx: None,
            reply: None,
            resume_wait: None,
            event_tx,
        };

        Ok((machine, event_rx))
    }

    /// Greet if configured and open the microphone for the first turn
    pub fn initialize(&mut self) {
        info!(
            "🎭 Conversation loop starting (webhook: {})",
            self.config.webhook_url
        );

        if self.config.greet_on_start {
            info!("👋 Greeting wave");
            self.animation.dispatch(AnimationCue::Waving);
        }

        if let Err(err) = self.enter_recording() {
            self.recover(err);
        }
    }

    /// Advance the loop by one step. `elapsed` is the wall time since the
    /// previous call. Never blocks and never fails; broken turns are
    /// abandoned and the loop returns to listening.
    pub fn tick(&mut self, elapsed: Duration) {
        match self.state {
            TurnState::Idle => {}
            TurnState::Recording => self.tick_recording(elapsed),
            TurnState::Uploading => self.tick_uploading(),
            TurnState::AwaitingReply => self.tick_awaiting_reply(),
            TurnState::Playing => self.tick_playing(elapsed),
            TurnState::Error => self.tick_error(),
        }
    }

    /// Finalize the current utterance now instead of waiting for silence
    pub fn force_stop(&mut self) {
        if self.state == TurnState::Recording {
            info!("⏭️ Force-stopping the current utterance");
            self.finalize_utterance();
        } else {
            debug!("Force stop ignored in state {}", self.state.name());
        }
    }

    /// Cut reply playback short; the settle delay and restart still apply
    pub fn stop_playback(&mut self) {
        if self.state == TurnState::Playing {
            info!("🔇 Interrupting reply playback");
            self.output.stop();
        } else {
            debug!("Stop playback ignored in state {}", self.state.name());
        }
    }

    /// Stop everything and return to `Idle`. Safe to call in any state.
    pub fn shutdown(&mut self) {
        info!("🛑 Conversation loop stopping");

        if let Some(task) = self.upload_task.take() {
            task.abort();
        }
        self.reply_rx = None;
        self.reply = None;
        self.output.stop();
        if self.capture.is_active() {
            if let Err(err) = self.capture.stop() {
                debug!("Capture stop during shutdown: {}", err);
            }
        }

        self.state = TurnState::Idle;
        info!("✅ Conversation loop stopped");
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    // Recording: pull full amplitude windows out of the capture buffer and
    // feed them to the silence detector. Windows are attributed audio time
    // (window / rate), so the quiet timeout tracks the recording itself.
    fn tick_recording(&mut self, elapsed: Duration) {
        self.recorded += elapsed;

        let position = match self.capture.position() {
            Ok(position) => position,
            Err(err) => return self.recover(err),
        };

        let window = self.config.silence_window;
        let window_span =
            Duration::from_secs_f64(window as f64 / self.config.sample_rate_hz as f64);

        let mut utterance_over = false;
        while position.saturating_sub(self.window_cursor) >= window as u64 {
            let samples = match self.capture.read(self.window_cursor, window) {
                Ok(samples) => samples,
                Err(err) => return self.recover(err),
            };
            self.window_cursor += window as u64;

            if self.silence.observe(&samples, window_span) {
                info!("🤫 Silence timeout, utterance is over");
                utterance_over = true;
                break;
            }
        }

        if !utterance_over && self.recorded >= self.config.max_record_duration() {
            info!("⏱️ Max recording duration reached, finalizing utterance");
            utterance_over = true;
        }

        if utterance_over {
            self.finalize_utterance();
        }
    }

    // Uploading -> AwaitingReply: the webhook answered
    // Uploading -> Recording (via recover): transport failed
    fn tick_uploading(&mut self) {
        let outcome = match self.reply_rx.as_mut() {
            Some(reply_rx) => reply_rx.try_recv(),
            None => {
                return self.recover(VoiceError::TransportFailure(
                    "No upload in flight".to_string(),
                ))
            }
        };

        match outcome {
            Err(TryRecvError::Empty) => {}
            Ok(result) => {
                self.upload_task = None;
                self.reply_rx = None;
                match result {
                    Ok(reply) => {
                        debug!("📥 Webhook reply received");
                        self.reply = Some(reply);
                        self.state = TurnState::AwaitingReply;
                    }
                    Err(err) => self.recover(err),
                }
            }
            Err(TryRecvError::Closed) => self.recover(VoiceError::TransportFailure(
                "Upload task dropped its reply channel".to_string(),
            )),
        }
    }

    // AwaitingReply -> Playing: decode the reply, dispatch its cue, then
    // start the speaker. The cue always lands before the first audio frame.
    fn tick_awaiting_reply(&mut self) {
        let reply = match self.reply.take() {
            Some(reply) => reply,
            None => {
                return self.recover(VoiceError::TransportFailure(
                    "Reply lost before processing".to_string(),
                ))
            }
        };

        let bytes = match reply.decode_audio() {
            Ok(bytes) => bytes,
            Err(err) => return self.recover(err),
        };

        let buffer = match wav::decode(&bytes) {
            Ok(buffer) => buffer,
            Err(wav_err) => match self.fallback.decode(&bytes) {
                Ok(buffer) => {
                    debug!("Reply was not canonical WAV ({}), fallback decoded it", wav_err);
                    buffer
                }
                Err(fallback_err) => {
                    return self.recover(VoiceError::DecodeFailure(format!(
                        "{wav_err}; fallback: {fallback_err}"
                    )))
                }
            },
        };

        let cue = reply.cue_token().map(AnimationCue::parse);
        if let Some(cue) = cue {
            debug!("💃 Animation cue: {}", cue);
            self.animation.dispatch(cue);
        }
        self.emit(ConversationEvent::ReplyReceived {
            timestamp: Utc::now(),
            cue,
            audio_bytes: bytes.len(),
        });

        if let Err(err) = self.output.play(&buffer) {
            return self.recover(err);
        }

        info!("🔊 Playing reply ({:.1}s)", buffer.duration().as_secs_f32());
        self.state = TurnState::Playing;
        self.resume_wait = None;
        self.emit(ConversationEvent::PlaybackStarted {
            timestamp: Utc::now(),
        });
    }

    // Playing -> Recording: once the sink drains, rest for the resume delay
    // so the mic does not pick up the speaker's tail, then listen again
    fn tick_playing(&mut self, elapsed: Duration) {
        match self.resume_wait {
            None => {
                if !self.output.is_playing() {
                    debug!("✅ Reply playback finished");
                    self.emit(ConversationEvent::PlaybackFinished {
                        timestamp: Utc::now(),
                    });
                    self.animation.dispatch(AnimationCue::Neutral);
                    self.resume_wait = Some(Duration::ZERO);
                }
            }
            Some(waited) => {
                let waited = waited + elapsed;
                if waited >= self.config.resume_delay() {
                    if let Err(err) = self.enter_recording() {
                        self.recover(err);
                    }
                } else {
                    self.resume_wait = Some(waited);
                }
            }
        }
    }

    // Error -> Recording: keep retrying the microphone until it comes back
    fn tick_error(&mut self) {
        match self.enter_recording() {
            Ok(()) => info!("✅ Microphone recovered"),
            Err(err) => debug!("Microphone still unavailable: {}", err),
        }
    }

    /// Open the microphone and arm the silence detector for a fresh turn
    fn enter_recording(&mut self) -> VoiceResult<()> {
        self.silence.reset();
        self.window_cursor = 0;
        self.recorded = Duration::ZERO;
        self.resume_wait = None;

        self.capture
            .start(self.config.sample_rate_hz, self.config.max_record_duration())?;

        self.state = TurnState::Recording;
        info!(
            "🎤 Listening (silence {:.0}ms below {})",
            self.config.silence_timeout().as_millis(),
            self.config.silence_threshold
        );
        self.emit(ConversationEvent::ListeningStarted {
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Stop capture and hand the utterance to the transport. An empty
    /// capture is a no-op turn: nothing is sent, listening just restarts.
    fn finalize_utterance(&mut self) {
        match self.stop_and_send() {
            Ok(()) => {}
            Err(VoiceError::CaptureEmpty) => {
                debug!("🫙 {}", VoiceError::CaptureEmpty);
                if let Err(err) = self.enter_recording() {
                    self.recover(err);
                }
            }
            Err(err) => self.recover(err),
        }
    }

    fn stop_and_send(&mut self) -> VoiceResult<()> {
        let frames = self.capture.stop()?;
        if frames == 0 {
            return Err(VoiceError::CaptureEmpty);
        }

        let samples = self.capture.read(0, frames as usize)?;
        let buffer = AudioBuffer::new(
            samples,
            self.capture.channel_count(),
            self.config.sample_rate_hz,
        )?;
        let duration = buffer.duration();

        info!(
            "⏹️ Utterance captured: {} frames ({:.1}s)",
            frames,
            duration.as_secs_f32()
        );
        self.emit(ConversationEvent::UtteranceCaptured {
            timestamp: Utc::now(),
            frames,
            duration,
        });

        let envelope = WireEnvelope::from_buffer(&buffer);
        let transport = Arc::clone(&self.transport);
        let (result_tx, result_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let result = transport.send(envelope).await;
            let _ = result_tx.send(result);
        });

        self.upload_task = Some(task);
        self.reply_rx = Some(result_rx);
        self.state = TurnState::Uploading;
        debug!("📤 Upload dispatched");
        Ok(())
    }

    /// Abandon the current turn and get back to listening. If the
    /// microphone will not restart the machine parks in `Error` and
    /// retries on every tick.
    fn recover(&mut self, err: VoiceError) {
        warn!("⚠️ Turn failed while {}: {}", self.state.name(), err);
        self.emit(ConversationEvent::TurnFailed {
            timestamp: Utc::now(),
            reason: err.to_string(),
        });

        if let Some(task) = self.upload_task.take() {
            task.abort();
        }
        self.reply_rx = None;
        self.reply = None;
        self.output.stop();
        if self.capture.is_active() {
            if let Err(stop_err) = self.capture.stop() {
                debug!("Capture stop during recovery: {}", stop_err);
            }
        }

        self.state = TurnState::Error;
        if let Err(restart_err) = self.enter_recording() {
            warn!("🛑 Microphone restart failed, will retry: {}", restart_err);
        }
    }

    fn emit(&self, event: ConversationEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("Conversation event receiver dropped");
        }
    }
}
