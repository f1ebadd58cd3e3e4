//! Integration tests for the conversation turn machine
//!
//! Scenario tests run on scripted in-memory backends so they are
//! deterministic in CI. Only the `#[ignore]`d test at the bottom touches
//! real audio hardware.

use async_trait::async_trait;
use avatar_voice::{
    wav, AnimationBackend, AnimationCue, AudioBuffer, CaptureBackend, ConversationEvent,
    ConversationTransport, ConversationTurnMachine, CpalCapture, FallbackDecoder, OutputBackend,
    ReplyEnvelope, TurnState, VoiceConfig, VoiceError, VoiceResult, WireEnvelope,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

const TICK: Duration = Duration::from_millis(33);
const RATE: u32 = 16_000;
const WINDOW: usize = 1024;

/// Shared, ordered record of backend calls, for ordering assertions
#[derive(Clone, Default)]
struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().expect("call log poisoned").push(entry.into());
    }

    fn snapshot(&self) -> Vec<String> {
        self.0.lock().expect("call log poisoned").clone()
    }
}

struct CaptureProbe {
    active: AtomicBool,
    starts: AtomicUsize,
}

/// Microphone stand-in fed from per-start scripts. Each `position` poll
/// reveals another chunk of the script, like a live stream filling the
/// buffer between ticks.
struct ScriptedCapture {
    scripts: Mutex<VecDeque<Vec<i16>>>,
    current: Mutex<Vec<i16>>,
    served: AtomicUsize,
    reveal_per_poll: usize,
    probe: Arc<CaptureProbe>,
}

impl ScriptedCapture {
    fn new(scripts: Vec<Vec<i16>>, reveal_per_poll: usize) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            current: Mutex::new(Vec::new()),
            served: AtomicUsize::new(0),
            reveal_per_poll,
            probe: Arc::new(CaptureProbe {
                active: AtomicBool::new(false),
                starts: AtomicUsize::new(0),
            }),
        }
    }

    fn probe(&self) -> Arc<CaptureProbe> {
        Arc::clone(&self.probe)
    }
}

impl CaptureBackend for ScriptedCapture {
    fn start(&mut self, _sample_rate_hz: u32, _max_duration: Duration) -> VoiceResult<()> {
        let script = self
            .scripts
            .lock()
            .expect("scripts poisoned")
            .pop_front()
            .unwrap_or_default();
        *self.current.lock().expect("current poisoned") = script;
        self.served.store(0, Ordering::SeqCst);
        self.probe.active.store(true, Ordering::SeqCst);
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn position(&self) -> VoiceResult<u64> {
        let total = self.current.lock().expect("current poisoned").len();
        let served = (self.served.load(Ordering::SeqCst) + self.reveal_per_poll).min(total);
        self.served.store(served, Ordering::SeqCst);
        Ok(served as u64)
    }

    fn read(&self, frame_offset: u64, frame_count: usize) -> VoiceResult<Vec<i16>> {
        let current = self.current.lock().expect("current poisoned");
        let start = frame_offset as usize;
        let end = start + frame_count;
        if end > current.len() {
            return Err(VoiceError::AudioStream(
                "Read past scripted capture".to_string(),
            ));
        }
        Ok(current[start..end].to_vec())
    }

    fn stop(&mut self) -> VoiceResult<u64> {
        self.probe.active.store(false, Ordering::SeqCst);
        Ok(self.served.load(Ordering::SeqCst) as u64)
    }

    fn channel_count(&self) -> u16 {
        1
    }

    fn is_active(&self) -> bool {
        self.probe.active.load(Ordering::SeqCst)
    }
}

/// Transport stand-in: scripted replies, captured requests
struct CannedTransport {
    replies: Mutex<VecDeque<VoiceResult<ReplyEnvelope>>>,
    requests: Mutex<Vec<Value>>,
}

impl CannedTransport {
    fn new(replies: Vec<VoiceResult<ReplyEnvelope>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<Value> {
        self.requests.lock().expect("requests poisoned").clone()
    }
}

#[async_trait]
impl ConversationTransport for CannedTransport {
    async fn send(&self, envelope: WireEnvelope) -> VoiceResult<ReplyEnvelope> {
        self.requests
            .lock()
            .expect("requests poisoned")
            .push(serde_json::to_value(&envelope).expect("serializable envelope"));
        self.replies
            .lock()
            .expect("replies poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                Err(VoiceError::TransportFailure(
                    "No scripted reply left".to_string(),
                ))
            })
    }
}

struct OutputProbe {
    playing: AtomicBool,
    polls_left: AtomicU32,
}

/// Speaker stand-in that reports "playing" for two polls, then drains
struct TestOutput {
    log: CallLog,
    probe: Arc<OutputProbe>,
}

impl TestOutput {
    fn new(log: CallLog) -> Self {
        Self {
            log,
            probe: Arc::new(OutputProbe {
                playing: AtomicBool::new(false),
                polls_left: AtomicU32::new(0),
            }),
        }
    }

    fn probe(&self) -> Arc<OutputProbe> {
        Arc::clone(&self.probe)
    }
}

impl OutputBackend for TestOutput {
    fn play(&self, buffer: &AudioBuffer) -> VoiceResult<()> {
        self.log.push(format!("play:{}", buffer.frame_count()));
        self.probe.playing.store(true, Ordering::SeqCst);
        self.probe.polls_left.store(2, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.probe.playing.store(false, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        if !self.probe.playing.load(Ordering::SeqCst) {
            return false;
        }
        let left = self.probe.polls_left.load(Ordering::SeqCst);
        if left == 0 {
            self.probe.playing.store(false, Ordering::SeqCst);
            false
        } else {
            self.probe.polls_left.store(left - 1, Ordering::SeqCst);
            true
        }
    }
}

struct TestAnimation {
    log: CallLog,
}

impl AnimationBackend for TestAnimation {
    fn dispatch(&self, cue: AnimationCue) {
        self.log.push(format!("cue:{}", cue));
    }
}

struct NoFallback;

impl FallbackDecoder for NoFallback {
    fn decode(&self, _bytes: &[u8]) -> VoiceResult<AudioBuffer> {
        Err(VoiceError::DecodeFailure("No fallback in tests".to_string()))
    }
}

fn test_config() -> VoiceConfig {
    VoiceConfig {
        webhook_url: "http://localhost:9000/webhook".to_string(),
        resume_delay_secs: 0.0,
        greet_on_start: false,
        ..Default::default()
    }
}

/// Half a second of voice, then enough quiet to trip the 3s timeout
fn speech_then_silence() -> Vec<i16> {
    let mut samples = vec![8000i16; (RATE / 2) as usize];
    samples.extend(std::iter::repeat(0i16).take((RATE * 7 / 2) as usize));
    samples
}

fn reply_wav() -> Vec<u8> {
    let buffer = AudioBuffer::new(vec![120i16; 1600], 1, RATE).expect("reply buffer");
    wav::encode(&buffer)
}

fn reply(audio_wav: Option<&[u8]>, animation: Option<&str>) -> ReplyEnvelope {
    ReplyEnvelope {
        audio: audio_wav.map(|bytes| BASE64.encode(bytes)),
        animation: animation.map(|token| token.to_string()),
    }
}

fn drain(events: &mut UnboundedReceiver<ConversationEvent>) -> Vec<ConversationEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Tick (yielding so the spawned upload can run) until the machine reaches
/// `target`, or panic after `max_ticks`
async fn drive_until(machine: &mut ConversationTurnMachine, target: TurnState, max_ticks: usize) {
    for _ in 0..max_ticks {
        if machine.state() == target {
            return;
        }
        tokio::task::yield_now().await;
        machine.tick(TICK);
    }
    panic!(
        "never reached {:?}, stuck in {:?}",
        target,
        machine.state()
    );
}

fn assert_at_most_one_active(state: TurnState, capture: &CaptureProbe, output: &OutputProbe) {
    let capturing = capture.active.load(Ordering::SeqCst);
    let uploading = matches!(state, TurnState::Uploading | TurnState::AwaitingReply);
    let playing = output.playing.load(Ordering::SeqCst);
    let active = [capturing, uploading, playing]
        .iter()
        .filter(|&&on| on)
        .count();
    assert!(
        active <= 1,
        "overlapping activity in {:?}: capture={} upload={} playback={}",
        state,
        capturing,
        uploading,
        playing
    );
}

#[tokio::test]
async fn test_full_turn_reaches_playback_and_relistens() {
    let log = CallLog::default();
    let capture = ScriptedCapture::new(vec![speech_then_silence()], WINDOW);
    let capture_probe = capture.probe();
    let transport = Arc::new(CannedTransport::new(vec![Ok(reply(
        Some(&reply_wav()),
        Some("Waving"),
    ))]));
    let output = TestOutput::new(log.clone());
    let output_probe = output.probe();

    let (mut machine, mut events) = ConversationTurnMachine::new(
        test_config(),
        Box::new(capture),
        Arc::clone(&transport) as Arc<dyn ConversationTransport>,
        Box::new(output),
        Box::new(NoFallback),
        Box::new(TestAnimation { log: log.clone() }),
    )
    .expect("machine");

    machine.initialize();
    assert_eq!(machine.state(), TurnState::Recording);
    let startup = drain(&mut events);
    assert!(matches!(
        startup.first(),
        Some(ConversationEvent::ListeningStarted { .. })
    ));

    // listen until the silence timeout commits the utterance
    let mut guard = 0;
    while machine.state() == TurnState::Recording {
        machine.tick(TICK);
        assert_at_most_one_active(machine.state(), &capture_probe, &output_probe);
        guard += 1;
        assert!(guard < 300, "silence never fired");
    }
    assert_eq!(machine.state(), TurnState::Uploading);

    let captured = drain(&mut events);
    let frames = captured
        .iter()
        .find_map(|event| match event {
            ConversationEvent::UtteranceCaptured { frames, .. } => Some(*frames),
            _ => None,
        })
        .expect("utterance event");
    assert!(frames >= (RATE / 2) as u64, "speech portion must be captured");

    drive_until(&mut machine, TurnState::AwaitingReply, 50).await;
    machine.tick(TICK);
    assert_eq!(machine.state(), TurnState::Playing);

    // the cue reached the rig before the first audio frame
    let calls = log.snapshot();
    let cue_at = calls
        .iter()
        .position(|call| call == "cue:waving")
        .expect("cue dispatched");
    let play_at = calls
        .iter()
        .position(|call| call.starts_with("play:"))
        .expect("playback started");
    assert!(cue_at < play_at, "cue must precede playback: {:?}", calls);

    let reply_events = drain(&mut events);
    assert!(matches!(
        reply_events.first(),
        Some(ConversationEvent::ReplyReceived {
            cue: Some(AnimationCue::Waving),
            ..
        })
    ));
    assert!(reply_events
        .iter()
        .any(|event| matches!(event, ConversationEvent::PlaybackStarted { .. })));

    // sink drains, then listening restarts on its own
    drive_until(&mut machine, TurnState::Recording, 20).await;
    let tail = drain(&mut events);
    assert!(tail
        .iter()
        .any(|event| matches!(event, ConversationEvent::PlaybackFinished { .. })));
    assert!(tail
        .iter()
        .any(|event| matches!(event, ConversationEvent::ListeningStarted { .. })));
    assert_eq!(capture_probe.starts.load(Ordering::SeqCst), 2);

    // wire shape: base64 WAV plus format metadata, exact field names
    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request["sampleRate"], 16_000);
    assert_eq!(request["channels"], 1);
    let wav_bytes = BASE64
        .decode(request["audio"].as_str().expect("audio field"))
        .expect("valid base64");
    let uploaded = wav::decode(&wav_bytes).expect("valid WAV");
    assert_eq!(uploaded.frame_count() as u64, frames);
    assert_eq!(uploaded.samples()[..100], vec![8000i16; 100][..]);

    machine.shutdown();
    assert_eq!(machine.state(), TurnState::Idle);
}

#[tokio::test]
async fn test_webhook_failure_abandons_turn_and_relistens() {
    let log = CallLog::default();
    let capture = ScriptedCapture::new(vec![speech_then_silence()], WINDOW);
    let capture_probe = capture.probe();
    let transport = Arc::new(CannedTransport::new(vec![Err(
        VoiceError::TransportFailure("Webhook returned 500 Internal Server Error".to_string()),
    )]));
    let output = TestOutput::new(log.clone());

    let (mut machine, mut events) = ConversationTurnMachine::new(
        test_config(),
        Box::new(capture),
        Arc::clone(&transport) as Arc<dyn ConversationTransport>,
        Box::new(output),
        Box::new(NoFallback),
        Box::new(TestAnimation { log: log.clone() }),
    )
    .expect("machine");

    machine.initialize();
    let mut guard = 0;
    while machine.state() == TurnState::Recording {
        machine.tick(TICK);
        guard += 1;
        assert!(guard < 300, "silence never fired");
    }

    drive_until(&mut machine, TurnState::Recording, 50).await;

    let events = drain(&mut events);
    let reason = events
        .iter()
        .find_map(|event| match event {
            ConversationEvent::TurnFailed { reason, .. } => Some(reason.clone()),
            _ => None,
        })
        .expect("turn failed event");
    assert!(reason.contains("500"), "reason: {}", reason);
    assert!(
        log.snapshot().iter().all(|call| !call.starts_with("play:")),
        "failed turn must not reach playback"
    );
    assert_eq!(capture_probe.starts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_undecodable_reply_is_abandoned() {
    let log = CallLog::default();
    let capture = ScriptedCapture::new(vec![speech_then_silence()], WINDOW);
    let transport = Arc::new(CannedTransport::new(vec![Ok(reply(
        Some(b"definitely not audio"),
        None,
    ))]));
    let output = TestOutput::new(log.clone());

    let (mut machine, mut events) = ConversationTurnMachine::new(
        test_config(),
        Box::new(capture),
        Arc::clone(&transport) as Arc<dyn ConversationTransport>,
        Box::new(output),
        Box::new(NoFallback),
        Box::new(TestAnimation { log: log.clone() }),
    )
    .expect("machine");

    machine.initialize();
    let mut guard = 0;
    while machine.state() == TurnState::Recording {
        machine.tick(TICK);
        guard += 1;
        assert!(guard < 300, "silence never fired");
    }

    drive_until(&mut machine, TurnState::Recording, 50).await;

    let events = drain(&mut events);
    let reason = events
        .iter()
        .find_map(|event| match event {
            ConversationEvent::TurnFailed { reason, .. } => Some(reason.clone()),
            _ => None,
        })
        .expect("turn failed event");
    assert!(reason.contains("fallback"), "reason: {}", reason);
    assert!(
        log.snapshot().is_empty(),
        "no cue and no playback on a dead reply: {:?}",
        log.snapshot()
    );
}

#[tokio::test]
async fn test_empty_capture_is_a_quiet_no_op() {
    let log = CallLog::default();
    let capture = ScriptedCapture::new(vec![Vec::new()], WINDOW);
    let capture_probe = capture.probe();
    let transport = Arc::new(CannedTransport::new(Vec::new()));
    let output = TestOutput::new(log.clone());

    let (mut machine, mut events) = ConversationTurnMachine::new(
        test_config(),
        Box::new(capture),
        Arc::clone(&transport) as Arc<dyn ConversationTransport>,
        Box::new(output),
        Box::new(NoFallback),
        Box::new(TestAnimation { log }),
    )
    .expect("machine");

    machine.initialize();
    machine.tick(TICK);
    machine.tick(TICK);
    assert_eq!(machine.state(), TurnState::Recording);

    machine.force_stop();

    // straight back to listening, webhook never called
    assert_eq!(machine.state(), TurnState::Recording);
    assert_eq!(capture_probe.starts.load(Ordering::SeqCst), 2);
    assert!(transport.requests().is_empty());

    let events = drain(&mut events);
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, ConversationEvent::TurnFailed { .. })),
        "empty capture is a no-op, not a failure"
    );
    assert!(!events
        .iter()
        .any(|event| matches!(event, ConversationEvent::UtteranceCaptured { .. })));
}

#[tokio::test]
async fn test_missing_reply_audio_fails_the_turn() {
    let log = CallLog::default();
    let capture = ScriptedCapture::new(vec![speech_then_silence()], WINDOW);
    let transport = Arc::new(CannedTransport::new(vec![Ok(reply(None, Some("Waving")))]));
    let output = TestOutput::new(log.clone());

    let (mut machine, mut events) = ConversationTurnMachine::new(
        test_config(),
        Box::new(capture),
        Arc::clone(&transport) as Arc<dyn ConversationTransport>,
        Box::new(output),
        Box::new(NoFallback),
        Box::new(TestAnimation { log: log.clone() }),
    )
    .expect("machine");

    machine.initialize();
    let mut guard = 0;
    while machine.state() == TurnState::Recording {
        machine.tick(TICK);
        guard += 1;
        assert!(guard < 300, "silence never fired");
    }

    drive_until(&mut machine, TurnState::Recording, 50).await;

    let events = drain(&mut events);
    assert!(events
        .iter()
        .any(|event| matches!(event, ConversationEvent::TurnFailed { .. })));
    // the orphaned cue is not acted out either
    assert!(log.snapshot().is_empty(), "calls: {:?}", log.snapshot());
}

#[tokio::test]
async fn test_unknown_cue_plays_as_neutral() {
    let log = CallLog::default();
    let capture = ScriptedCapture::new(vec![speech_then_silence()], WINDOW);
    let transport = Arc::new(CannedTransport::new(vec![Ok(reply(
        Some(&reply_wav()),
        Some("Backflip"),
    ))]));
    let output = TestOutput::new(log.clone());

    let (mut machine, mut events) = ConversationTurnMachine::new(
        test_config(),
        Box::new(capture),
        Arc::clone(&transport) as Arc<dyn ConversationTransport>,
        Box::new(output),
        Box::new(NoFallback),
        Box::new(TestAnimation { log: log.clone() }),
    )
    .expect("machine");

    machine.initialize();
    let mut guard = 0;
    while machine.state() == TurnState::Recording {
        machine.tick(TICK);
        guard += 1;
        assert!(guard < 300, "silence never fired");
    }

    drive_until(&mut machine, TurnState::Playing, 50).await;

    let events = drain(&mut events);
    assert!(events.iter().any(|event| matches!(
        event,
        ConversationEvent::ReplyReceived {
            cue: Some(AnimationCue::Neutral),
            ..
        }
    )));
    assert!(log.snapshot().contains(&"cue:neutral".to_string()));
}

#[tokio::test]
async fn test_greeting_wave_on_start() {
    let log = CallLog::default();
    let capture = ScriptedCapture::new(vec![Vec::new()], WINDOW);
    let transport = Arc::new(CannedTransport::new(Vec::new()));
    let output = TestOutput::new(log.clone());

    let config = VoiceConfig {
        greet_on_start: true,
        ..test_config()
    };
    let (mut machine, _events) = ConversationTurnMachine::new(
        config,
        Box::new(capture),
        Arc::clone(&transport) as Arc<dyn ConversationTransport>,
        Box::new(output),
        Box::new(NoFallback),
        Box::new(TestAnimation { log: log.clone() }),
    )
    .expect("machine");

    machine.initialize();
    assert_eq!(machine.state(), TurnState::Recording);
    assert_eq!(log.snapshot().first().map(String::as_str), Some("cue:waving"));
}

#[tokio::test]
async fn test_force_stop_commits_mid_speech() {
    let log = CallLog::default();
    // voice that never goes quiet; only a force stop can end it
    let capture = ScriptedCapture::new(vec![vec![4000i16; RATE as usize * 2]], WINDOW);
    let transport = Arc::new(CannedTransport::new(vec![Ok(reply(
        Some(&reply_wav()),
        None,
    ))]));
    let output = TestOutput::new(log.clone());

    let (mut machine, mut events) = ConversationTurnMachine::new(
        test_config(),
        Box::new(capture),
        Arc::clone(&transport) as Arc<dyn ConversationTransport>,
        Box::new(output),
        Box::new(NoFallback),
        Box::new(TestAnimation { log }),
    )
    .expect("machine");

    machine.initialize();
    for _ in 0..10 {
        machine.tick(TICK);
    }
    assert_eq!(machine.state(), TurnState::Recording);

    machine.force_stop();
    assert_eq!(machine.state(), TurnState::Uploading);

    drive_until(&mut machine, TurnState::Recording, 50).await;

    assert_eq!(transport.requests().len(), 1);
    let events = drain(&mut events);
    assert!(events
        .iter()
        .any(|event| matches!(event, ConversationEvent::UtteranceCaptured { .. })));
    assert!(events
        .iter()
        .any(|event| matches!(event, ConversationEvent::PlaybackFinished { .. })));
}

#[tokio::test]
async fn test_stop_playback_cuts_the_reply_short() {
    let log = CallLog::default();
    let capture = ScriptedCapture::new(vec![speech_then_silence()], WINDOW);
    let transport = Arc::new(CannedTransport::new(vec![Ok(reply(
        Some(&reply_wav()),
        None,
    ))]));
    let output = TestOutput::new(log.clone());
    let output_probe = output.probe();

    let (mut machine, mut events) = ConversationTurnMachine::new(
        test_config(),
        Box::new(capture),
        Arc::clone(&transport) as Arc<dyn ConversationTransport>,
        Box::new(output),
        Box::new(NoFallback),
        Box::new(TestAnimation { log }),
    )
    .expect("machine");

    machine.initialize();
    let mut guard = 0;
    while machine.state() == TurnState::Recording {
        machine.tick(TICK);
        guard += 1;
        assert!(guard < 300, "silence never fired");
    }

    drive_until(&mut machine, TurnState::Playing, 50).await;
    assert!(output_probe.playing.load(Ordering::SeqCst));

    machine.stop_playback();
    assert!(!output_probe.playing.load(Ordering::SeqCst));

    drive_until(&mut machine, TurnState::Recording, 20).await;
    let events = drain(&mut events);
    assert!(events
        .iter()
        .any(|event| matches!(event, ConversationEvent::PlaybackFinished { .. })));
}

#[tokio::test]
#[ignore] // Requires audio hardware
async fn test_live_capture_lifecycle() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut capture = CpalCapture::new(None);
    capture
        .start(RATE, Duration::from_secs(2))
        .expect("open microphone");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let position = capture.position().expect("position");
    let frames = capture.stop().expect("stop");
    assert!(frames >= position);
    println!("captured {} frames from the default input", frames);
}
