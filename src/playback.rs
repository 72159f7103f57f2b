//! Strictly ordered playback of inbound audio.
//!
//! Chunks arrive as base64 PCM and are rendered one at a time, in arrival
//! order, with a short silence gap between chunks. The queue and its
//! `draining` flag share one mutex, so racing enqueues can never spawn a
//! second consumer and the consumer can never exit while a chunk is
//! pending.

use crate::device::AudioSink;
use crate::pcm;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("empty audio payload")]
    Empty,
}

/// Base64 PCM to float samples, the inverse of the capture-side
/// quantization.
pub fn decode_chunk(payload: &str) -> Result<Vec<f32>, DecodeError> {
    let bytes = BASE64.decode(payload)?;
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(pcm::dequantize(&bytes))
}

struct QueueState {
    pending: VecDeque<String>,
    draining: bool,
    consumer: Option<JoinHandle<()>>,
    closed: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    sink: tokio::sync::Mutex<Box<dyn AudioSink>>,
    sample_rate: u32,
    gap: Duration,
}

/// FIFO of pending audio payloads with a single consumer task.
#[derive(Clone)]
pub struct PlaybackQueue {
    shared: Arc<Shared>,
}

impl PlaybackQueue {
    pub fn new(sink: Box<dyn AudioSink>, sample_rate: u32, gap: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    draining: false,
                    consumer: None,
                    closed: false,
                }),
                sink: tokio::sync::Mutex::new(sink),
                sample_rate,
                gap,
            }),
        }
    }

    /// Append one base64 PCM payload. Starts the consumer if none is
    /// running; otherwise the running consumer picks it up.
    pub fn enqueue(&self, payload: String) {
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.closed {
            debug!("playback stopped; chunk discarded");
            return;
        }
        queue.pending.push_back(payload);
        if !queue.draining {
            queue.draining = true;
            let shared = self.shared.clone();
            queue.consumer = Some(tokio::spawn(drain(shared)));
        }
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().unwrap().pending.len()
    }

    /// Drop queued chunks, cancel the consumer, and release the output
    /// device. Further enqueues are discarded.
    pub async fn stop(&self) {
        let consumer = {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.closed = true;
            queue.pending.clear();
            queue.draining = false;
            queue.consumer.take()
        };
        if let Some(handle) = consumer {
            handle.abort();
        }
        self.shared.sink.lock().await.release().await;
    }
}

/// The single consumer: pop, decode, render to completion, pause for the
/// inter-chunk gap, repeat. A chunk that fails to decode or render is
/// logged and skipped; it never stalls the queue.
async fn drain(shared: Arc<Shared>) {
    loop {
        let payload = {
            let mut queue = shared.queue.lock().unwrap();
            match queue.pending.pop_front() {
                Some(payload) => payload,
                None => {
                    queue.draining = false;
                    return;
                }
            }
        };
        match decode_chunk(&payload) {
            Ok(samples) => {
                let mut sink = shared.sink.lock().await;
                if let Err(e) = sink.render(samples, shared.sample_rate).await {
                    warn!(error = %e, "render failed, skipping chunk");
                }
            }
            Err(e) => {
                warn!(error = %e, "dropping undecodable audio chunk");
                continue;
            }
        }
        tokio::time::sleep(shared.gap).await;
    }
}
