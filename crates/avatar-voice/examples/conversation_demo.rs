//! Conversation Demo — full microphone-to-webhook loop on real devices.
//!
//! Records from the default (or `AVATAR_MIC_DEVICE`) input, posts each
//! utterance to `AVATAR_WEBHOOK_URL` as base64 WAV and plays whatever comes
//! back. Animation cues are printed instead of driving a rig.
//!
//! Set at least `AVATAR_WEBHOOK_URL` in `.env` before running.

use avatar_voice::{
    AnimationBackend, AnimationCue, ConversationTurnMachine, CpalCapture, RodioDecoder,
    RodioOutput, VoiceConfig, WebhookTransport,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Prints cues where a kiosk would drive the avatar rig
struct LoggedAnimation;

impl AnimationBackend for LoggedAnimation {
    fn dispatch(&self, cue: AnimationCue) {
        info!("💃 Avatar cue: {}", cue);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Conversation Demo — mic → webhook → speaker, looping until Ctrl+C");
    for device in CpalCapture::list_input_devices()? {
        info!("Input device: {}", device);
    }

    let config = VoiceConfig::from_env();
    let transport = Arc::new(WebhookTransport::new(
        config.webhook_url.clone(),
        config.request_timeout(),
    )?);
    let capture = Box::new(CpalCapture::new(config.mic_device.clone()));
    let output = Box::new(RodioOutput::new()?);

    let (mut machine, mut events) = ConversationTurnMachine::new(
        config,
        capture,
        transport,
        output,
        Box::new(RodioDecoder::new()),
        Box::new(LoggedAnimation),
    )?;

    machine.initialize();

    let mut ticker = tokio::time::interval(Duration::from_millis(33));
    let mut last_tick = Instant::now();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received");
                break;
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                machine.tick(now.duration_since(last_tick));
                last_tick = now;

                while let Ok(event) = events.try_recv() {
                    info!("Event: {:?}", event);
                }
            }
        }
    }

    machine.shutdown();
    Ok(())
}
