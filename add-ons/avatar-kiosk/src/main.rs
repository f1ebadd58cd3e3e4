//! Avatar Kiosk (Headless Conversation Host)
//!
//! A long-running binary that drives the conversation turn machine on a
//! fixed tick: microphone in, webhook exchange, reply audio out. Animation
//! cues are logged where a rendering frontend would drive the avatar rig.

use avatar_voice::{
    AnimationBackend, AnimationCue, ConversationTurnMachine, CpalCapture, RodioDecoder,
    RodioOutput, VoiceConfig, WebhookTransport,
};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default tick cadence, roughly one render frame.
const DEFAULT_TICK_MS: u64 = 33;

/// Cue sink for headless installs; a rendering frontend replaces this.
struct KioskAnimation;

impl AnimationBackend for KioskAnimation {
    fn dispatch(&self, cue: AnimationCue) {
        tracing::info!(cue = %cue, "🎭 Avatar cue");
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!(
            "[avatar-kiosk] .env not loaded: {} (using system environment)",
            e
        );
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::var("AVATAR_CONFIG") {
        Ok(path) => VoiceConfig::load_from_path(Path::new(&path)).expect("load AVATAR_CONFIG"),
        Err(_) => VoiceConfig::from_env(),
    };

    let tick_ms = std::env::var("AVATAR_TICK_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_TICK_MS)
        .max(1);

    match CpalCapture::list_input_devices() {
        Ok(devices) => {
            for device in devices {
                tracing::info!("Input device: {}", device);
            }
        }
        Err(e) => tracing::warn!(error = %e, "could not enumerate input devices"),
    }

    let transport = Arc::new(
        WebhookTransport::new(config.webhook_url.clone(), config.request_timeout())
            .expect("build webhook client"),
    );
    let capture = Box::new(CpalCapture::new(config.mic_device.clone()));
    let output = Box::new(RodioOutput::new().expect("open audio output"));

    tracing::info!(
        tick_ms,
        webhook = %config.webhook_url,
        sample_rate_hz = config.sample_rate_hz,
        mic = %config.mic_device.as_deref().unwrap_or("system default"),
        "Avatar kiosk started"
    );

    let (mut machine, mut events) = ConversationTurnMachine::new(
        config,
        capture,
        transport,
        output,
        Box::new(RodioDecoder::new()),
        Box::new(KioskAnimation),
    )
    .expect("build conversation loop");

    machine.initialize();

    let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Instant::now();
                machine.tick(now.duration_since(last_tick));
                last_tick = now;

                while let Ok(event) = events.try_recv() {
                    tracing::debug!(?event, "conversation event");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; shutting down kiosk");
                break;
            }
        }
    }

    machine.shutdown();
}
