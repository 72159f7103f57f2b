//! PulseAudio device adapters.
//!
//! Both ends use the simple blocking API on a dedicated OS thread and talk
//! to the async side over channels. Capture is mono float at 16 kHz; the
//! speaker opens lazily on the first rendered chunk and drains the stream
//! before reporting a chunk complete.

use crate::device::{AudioSink, DeviceError, MicSource};
use async_trait::async_trait;
use libpulse_binding::error::{Code, PAErr};
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

pub const CAPTURE_RATE: u32 = 16_000;
/// 64 ms of mono samples at the capture rate.
const CAPTURE_BLOCK: usize = 1024;

fn classify(err: PAErr, what: &str) -> DeviceError {
    match Code::try_from(err) {
        Ok(Code::Access) => DeviceError::AccessDenied(what.to_string()),
        Ok(Code::NoEntity) => DeviceError::NotFound(what.to_string()),
        _ => DeviceError::Failed(format!("{what}: {err}")),
    }
}

/// Microphone on the default PulseAudio source.
pub struct PulseMic {
    app_name: String,
    shutdown: Arc<AtomicBool>,
}

impl PulseMic {
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl MicSource for PulseMic {
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<f32>>, DeviceError> {
        let (tx, rx) = mpsc::channel(32);
        let (ready_tx, ready_rx) = oneshot::channel();
        self.shutdown.store(false, Ordering::Relaxed);
        let shutdown = self.shutdown.clone();
        let app_name = self.app_name.clone();
        std::thread::spawn(move || capture_thread(app_name, tx, ready_tx, shutdown));
        match ready_rx.await {
            Ok(Ok(())) => Ok(rx),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DeviceError::Failed(
                "capture thread exited before opening the device".to_string(),
            )),
        }
    }

    async fn stop(&mut self) {
        // The capture thread notices on its next block and exits.
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

fn capture_thread(
    app_name: String,
    tx: mpsc::Sender<Vec<f32>>,
    ready: oneshot::Sender<Result<(), DeviceError>>,
    shutdown: Arc<AtomicBool>,
) {
    let spec = Spec {
        format: Format::F32le,
        channels: 1,
        rate: CAPTURE_RATE,
    };
    let simple = match Simple::new(
        None,      // default server
        &app_name, // application name
        Direction::Record,
        None, // default device
        "capture",
        &spec,
        None, // default channel map
        None, // default buffering
    ) {
        Ok(simple) => {
            let _ = ready.send(Ok(()));
            simple
        }
        Err(e) => {
            let _ = ready.send(Err(classify(e, "microphone")));
            return;
        }
    };
    info!("microphone capture started");

    let mut buf = [0u8; CAPTURE_BLOCK * 4];
    while !shutdown.load(Ordering::Relaxed) {
        if let Err(e) = simple.read(&mut buf) {
            error!(error = %e, "microphone read failed");
            break;
        }
        let block: Vec<f32> = buf
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        if tx.blocking_send(block).is_err() {
            break;
        }
    }
    info!("microphone capture stopped");
}

struct PlayCmd {
    samples: Vec<f32>,
    sample_rate: u32,
    done: oneshot::Sender<Result<(), DeviceError>>,
}

struct SpeakerWorker {
    tx: std::sync::mpsc::Sender<PlayCmd>,
}

/// Speaker on the default PulseAudio sink. The stream is opened on the
/// first chunk and reused until `release`.
pub struct PulseSpeaker {
    app_name: String,
    worker: Option<SpeakerWorker>,
}

impl PulseSpeaker {
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            worker: None,
        }
    }
}

#[async_trait]
impl AudioSink for PulseSpeaker {
    async fn render(&mut self, samples: Vec<f32>, sample_rate: u32) -> Result<(), DeviceError> {
        if self.worker.is_none() {
            let (tx, rx) = std::sync::mpsc::channel::<PlayCmd>();
            let app_name = self.app_name.clone();
            std::thread::spawn(move || playback_thread(app_name, rx));
            self.worker = Some(SpeakerWorker { tx });
        }
        let (done_tx, done_rx) = oneshot::channel();
        let cmd = PlayCmd {
            samples,
            sample_rate,
            done: done_tx,
        };
        let delivered = match &self.worker {
            Some(worker) => worker.tx.send(cmd).is_ok(),
            None => false,
        };
        if !delivered {
            self.worker = None;
            return Err(DeviceError::Failed("playback thread is gone".to_string()));
        }
        match done_rx.await {
            Ok(result) => result,
            Err(_) => Err(DeviceError::Failed(
                "playback thread dropped the chunk".to_string(),
            )),
        }
    }

    async fn release(&mut self) {
        // Dropping the channel lets the worker finish its current chunk,
        // close the stream, and exit.
        self.worker = None;
    }
}

fn playback_thread(app_name: String, rx: std::sync::mpsc::Receiver<PlayCmd>) {
    let mut device: Option<(Simple, u32)> = None;
    while let Ok(cmd) = rx.recv() {
        let result = write_chunk(&app_name, &mut device, &cmd.samples, cmd.sample_rate);
        let _ = cmd.done.send(result);
    }
    info!("speaker released");
}

fn write_chunk(
    app_name: &str,
    device: &mut Option<(Simple, u32)>,
    samples: &[f32],
    sample_rate: u32,
) -> Result<(), DeviceError> {
    if device.as_ref().map(|(_, rate)| *rate) != Some(sample_rate) {
        let spec = Spec {
            format: Format::F32le,
            channels: 1,
            rate: sample_rate,
        };
        let simple = Simple::new(
            None,
            app_name,
            Direction::Playback,
            None,
            "playback",
            &spec,
            None,
            None,
        )
        .map_err(|e| classify(e, "speaker"))?;
        *device = Some((simple, sample_rate));
    }
    let Some((simple, _)) = device.as_mut() else {
        return Err(DeviceError::Failed("speaker unavailable".to_string()));
    };
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    let result = simple.write(&bytes).and_then(|()| simple.drain());
    if let Err(e) = result {
        let err = classify(e, "speaker");
        // force a fresh stream on the next chunk
        *device = None;
        return Err(err);
    }
    Ok(())
}
