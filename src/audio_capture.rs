//! Microphone capture pipeline.
//!
//! Float blocks from the microphone accumulate in a sample buffer; a
//! fixed send tick drains the buffer, quantizes it to s16-le PCM, and
//! ships it base64-encoded over the link. The buffer handoff happens
//! under one mutex with the capture side, so samples are never dropped or
//! duplicated across a tick.

use crate::device::{DeviceError, MicSource};
use crate::link::LiveLink;
use crate::pcm;
use crate::protocol::ClientEnvelope;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

pub struct AudioPipeline {
    link: LiveLink,
    mic: Box<dyn MicSource>,
    send_tick: Duration,
    buffer: Arc<Mutex<Vec<f32>>>,
    muted: Arc<AtomicBool>,
    level: Arc<AtomicU32>,
    capture_task: Option<JoinHandle<()>>,
    send_task: Option<JoinHandle<()>>,
}

impl AudioPipeline {
    pub fn new(link: LiveLink, mic: Box<dyn MicSource>, send_tick: Duration) -> Self {
        Self {
            link,
            mic,
            send_tick,
            buffer: Arc::new(Mutex::new(Vec::new())),
            muted: Arc::new(AtomicBool::new(false)),
            level: Arc::new(AtomicU32::new(0)),
            capture_task: None,
            send_task: None,
        }
    }

    /// Start sampling the microphone. A device-access failure aborts the
    /// start and surfaces to the caller; nothing else in the session is
    /// affected.
    pub async fn start(&mut self) -> Result<(), DeviceError> {
        if self.capture_task.is_some() {
            return Ok(());
        }
        let blocks = self.mic.start().await?;
        self.capture_task = Some(tokio::spawn(capture_loop(
            blocks,
            self.buffer.clone(),
            self.level.clone(),
        )));
        self.send_task = Some(tokio::spawn(send_loop(
            self.link.clone(),
            self.buffer.clone(),
            self.muted.clone(),
            self.send_tick,
        )));
        Ok(())
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Input level in [0, 1] for UI display, updated per captured block.
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }

    pub async fn stop(&mut self) {
        for handle in [self.capture_task.take(), self.send_task.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
        self.mic.stop().await;
        self.buffer.lock().unwrap().clear();
        self.level.store(0, Ordering::Relaxed);
    }
}

async fn capture_loop(
    mut blocks: mpsc::Receiver<Vec<f32>>,
    buffer: Arc<Mutex<Vec<f32>>>,
    level: Arc<AtomicU32>,
) {
    while let Some(block) = blocks.recv().await {
        level.store(pcm::level(&block).to_bits(), Ordering::Relaxed);
        buffer.lock().unwrap().extend_from_slice(&block);
    }
    // Mid-stream device loss ends audio capture only; video and the rest
    // of the session keep running.
    warn!("microphone stream ended");
}

async fn send_loop(
    link: LiveLink,
    buffer: Arc<Mutex<Vec<f32>>>,
    muted: Arc<AtomicBool>,
    tick: Duration,
) {
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let gated = muted.load(Ordering::Relaxed) || !link.is_ready().await;
        let samples = {
            let mut buffer = buffer.lock().unwrap();
            if buffer.is_empty() {
                continue;
            }
            std::mem::take(&mut *buffer)
        };
        if gated {
            // Dropped, not queued: a muted mic or a stalled link must not
            // grow the buffer without bound.
            continue;
        }
        let data = BASE64.encode(pcm::quantize(&samples));
        if !link.send(&ClientEnvelope::AudioData { data }).await {
            debug!("audio chunk dropped by readiness gate");
        }
    }
}
