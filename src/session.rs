//! Session controller.
//!
//! Wires one transport link, both capture pipelines, the playback queue,
//! and the transcript together, and surfaces UI-facing state through an
//! event channel.

use crate::audio_capture::AudioPipeline;
use crate::device::{AudioSink, DeviceError, FrameSource, MicSource};
use crate::link::{LinkConfig, LinkEvent, LinkState, LiveLink};
use crate::playback::PlaybackQueue;
use crate::protocol::{ClientEnvelope, RemoteStatus, ServerEnvelope};
use crate::video_capture::VideoPipeline;
use crate::wire::Connector;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub link: LinkConfig,
    /// Audio send tick.
    pub audio_tick: Duration,
    /// Still-frame cadence.
    pub video_tick: Duration,
    pub jpeg_quality: u8,
    /// Playback sample rate of the response audio.
    pub playback_rate: u32,
    /// Silence between played chunks.
    pub playback_gap: Duration,
    /// Keepalive ping period.
    pub keepalive: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            audio_tick: Duration::from_millis(64),
            video_tick: Duration::from_secs(1),
            jpeg_quality: 80,
            playback_rate: 24_000,
            playback_gap: Duration::from_millis(50),
            keepalive: Duration::from_secs(15),
        }
    }
}

/// UI-facing session events.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Local link lifecycle.
    Link(LinkState),
    /// Connection status as reported by the server.
    Remote(RemoteStatus),
    AssistantText(String),
    AssistantTranscript(String),
    UserTranscript(String),
    ServerError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct TranscriptLine {
    pub speaker: Speaker,
    pub text: String,
}

pub struct LiveSession {
    link: LiveLink,
    audio: AudioPipeline,
    video: VideoPipeline,
    playback: PlaybackQueue,
    transcript: Arc<Mutex<Vec<TranscriptLine>>>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    link_events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    keepalive_period: Duration,
    router: Option<JoinHandle<()>>,
    keepalive: Option<JoinHandle<()>>,
}

impl LiveSession {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        mic: Box<dyn MicSource>,
        feed: Box<dyn FrameSource>,
        speaker: Box<dyn AudioSink>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (link, link_events) = LiveLink::new(config.link, connector);
        let audio = AudioPipeline::new(link.clone(), mic, config.audio_tick);
        let video = VideoPipeline::new(link.clone(), feed, config.video_tick, config.jpeg_quality);
        let playback = PlaybackQueue::new(speaker, config.playback_rate, config.playback_gap);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Self {
            link,
            audio,
            video,
            playback,
            transcript: Arc::new(Mutex::new(Vec::new())),
            events_tx,
            link_events: Some(link_events),
            keepalive_period: config.keepalive,
            router: None,
            keepalive: None,
        };
        (session, events_rx)
    }

    /// Open the link and start the pipelines. Capture never reaches the
    /// wire before the link is ready: each pipeline checks the link's own
    /// readiness signal on every tick rather than any cached state.
    pub async fn start(&mut self) -> Result<(), DeviceError> {
        self.link.open().await;
        self.audio.start().await?;
        self.video.start();
        let Some(link_events) = self.link_events.take() else {
            return Ok(());
        };
        self.router = Some(tokio::spawn(route(
            link_events,
            self.events_tx.clone(),
            self.playback.clone(),
            self.transcript.clone(),
        )));
        self.keepalive = Some(tokio::spawn(keepalive_loop(
            self.link.clone(),
            self.keepalive_period,
        )));
        Ok(())
    }

    /// Tear everything down: capture ticks and keepalive first, then the
    /// link (which cancels its settle and reconnect timers), then the
    /// output device. Safe to call twice.
    pub async fn stop(&mut self) {
        self.audio.stop().await;
        self.video.stop().await;
        if let Some(task) = self.keepalive.take() {
            task.abort();
        }
        self.link.close().await;
        self.playback.stop().await;
        if let Some(task) = self.router.take() {
            task.abort();
        }
    }

    pub async fn send_text(&self, text: &str) -> bool {
        self.link
            .send(&ClientEnvelope::TextMessage {
                text: text.to_string(),
            })
            .await
    }

    pub fn set_muted(&self, muted: bool) {
        self.audio.set_muted(muted);
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        self.video.set_enabled(enabled);
    }

    pub fn audio_level(&self) -> f32 {
        self.audio.level()
    }

    pub async fn link_state(&self) -> LinkState {
        self.link.state().await
    }

    pub fn transcript(&self) -> Vec<TranscriptLine> {
        self.transcript.lock().unwrap().clone()
    }
}

/// Routes inbound messages: audio payloads to the playback queue, text
/// and transcriptions to the transcript and the UI event channel.
async fn route(
    mut link_events: mpsc::UnboundedReceiver<LinkEvent>,
    events: mpsc::UnboundedSender<SessionEvent>,
    playback: PlaybackQueue,
    transcript: Arc<Mutex<Vec<TranscriptLine>>>,
) {
    while let Some(event) = link_events.recv().await {
        match event {
            LinkEvent::State(state) => {
                let _ = events.send(SessionEvent::Link(state));
            }
            LinkEvent::Message(envelope) => match envelope {
                ServerEnvelope::ConnectionStatus { status, message } => {
                    debug!(?status, message = message.as_deref().unwrap_or(""), "remote status");
                    let _ = events.send(SessionEvent::Remote(status));
                }
                ServerEnvelope::Response { data } => {
                    if let Some(audio) = data.audio {
                        playback.enqueue(audio);
                    }
                    if let Some(text) = data.text {
                        transcript.lock().unwrap().push(TranscriptLine {
                            speaker: Speaker::Assistant,
                            text: text.clone(),
                        });
                        let _ = events.send(SessionEvent::AssistantText(text));
                    }
                    if let Some(text) = data.transcription {
                        let _ = events.send(SessionEvent::AssistantTranscript(text));
                    }
                    if let Some(text) = data.user_transcription {
                        transcript.lock().unwrap().push(TranscriptLine {
                            speaker: Speaker::User,
                            text: text.clone(),
                        });
                        let _ = events.send(SessionEvent::UserTranscript(text));
                    }
                }
                ServerEnvelope::Error { message } => {
                    warn!(message = %message, "server reported an error");
                    let _ = events.send(SessionEvent::ServerError(message));
                }
                ServerEnvelope::Pong { timestamp } => {
                    debug!(?timestamp, "pong");
                }
            },
        }
    }
}

async fn keepalive_loop(link: LiveLink, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if !link.is_ready().await {
            continue;
        }
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .ok();
        link.send(&ClientEnvelope::Ping { timestamp }).await;
    }
}
