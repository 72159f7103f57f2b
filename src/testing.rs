//! Test doubles for the transport and device seams.
//!
//! Every fake is scriptable from the outside: the connector hands out
//! wires whose inbound side the test drives directly, the microphone is a
//! plain channel, the frame feed serves a queued script, and the speaker
//! records when each render started and finished.

use crate::device::{AudioSink, DeviceError, FrameSource, MicSource, RawFrame};
use crate::wire::{Connector, Wire, WireError, WireEvent};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Scriptable [`Connector`]. With an empty script every connect succeeds.
pub struct FakeConnector {
    refusals: Mutex<usize>,
    attempts: AtomicUsize,
    wires: Mutex<Vec<FakeWireHandle>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            refusals: Mutex::new(0),
            attempts: AtomicUsize::new(0),
            wires: Mutex::new(Vec::new()),
        })
    }

    /// Make the next `n` connect attempts fail.
    pub fn refuse_next(&self, n: usize) {
        *self.refusals.lock().unwrap() += n;
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Handle to the most recently opened wire. Panics if nothing has
    /// connected yet.
    pub fn last_wire(&self) -> FakeWireHandle {
        self.wires
            .lock()
            .unwrap()
            .last()
            .expect("no connection was opened")
            .clone()
    }

    pub fn wire_count(&self) -> usize {
        self.wires.lock().unwrap().len()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _url: &str,
    ) -> Result<(Box<dyn Wire>, mpsc::UnboundedReceiver<WireEvent>), WireError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        {
            let mut refusals = self.refusals.lock().unwrap();
            if *refusals > 0 {
                *refusals -= 1;
                return Err(WireError::Connect("refused by test script".to_string()));
            }
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let close_frame = Arc::new(Mutex::new(None));
        let handle = FakeWireHandle {
            sent: sent.clone(),
            close_frame: close_frame.clone(),
            events: Arc::new(Mutex::new(Some(events_tx))),
        };
        self.wires.lock().unwrap().push(handle);
        Ok((Box::new(FakeWire { sent, close_frame }), events_rx))
    }
}

/// Test-side handle to one fake connection.
#[derive(Clone)]
pub struct FakeWireHandle {
    sent: Arc<Mutex<Vec<String>>>,
    close_frame: Arc<Mutex<Option<(u16, String)>>>,
    events: Arc<Mutex<Option<mpsc::UnboundedSender<WireEvent>>>>,
}

impl FakeWireHandle {
    /// Inject one inbound text frame.
    pub fn push_text(&self, text: impl Into<String>) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(WireEvent::Text(text.into()));
        }
    }

    /// Simulate the peer closing the connection.
    pub fn push_close(&self, code: u16, reason: &str) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(WireEvent::Closed {
                code,
                reason: reason.to_string(),
            });
        }
    }

    /// Simulate the connection vanishing without a close frame.
    pub fn drop_events(&self) {
        self.events.lock().unwrap().take();
    }

    /// Every text frame the client sent on this wire, in order.
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// The close frame the client sent, if any.
    pub fn close_frame(&self) -> Option<(u16, String)> {
        self.close_frame.lock().unwrap().clone()
    }
}

struct FakeWire {
    sent: Arc<Mutex<Vec<String>>>,
    close_frame: Arc<Mutex<Option<(u16, String)>>>,
}

#[async_trait]
impl Wire for FakeWire {
    async fn send_text(&mut self, text: String) -> Result<(), WireError> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), WireError> {
        *self.close_frame.lock().unwrap() = Some((code, reason.to_string()));
        Ok(())
    }
}

/// Microphone fed by the test through a channel.
pub struct FakeMic {
    feed: Option<mpsc::Receiver<Vec<f32>>>,
    fail_with: Option<DeviceError>,
    stopped: Arc<Mutex<bool>>,
}

impl FakeMic {
    pub fn new() -> (Self, mpsc::Sender<Vec<f32>>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                feed: Some(rx),
                fail_with: None,
                stopped: Arc::new(Mutex::new(false)),
            },
            tx,
        )
    }

    /// A microphone whose start fails with the given error.
    pub fn failing(error: DeviceError) -> Self {
        Self {
            feed: None,
            fail_with: Some(error),
            stopped: Arc::new(Mutex::new(false)),
        }
    }

    /// Shared flag set once the pipeline releases the device.
    pub fn stopped_flag(&self) -> Arc<Mutex<bool>> {
        self.stopped.clone()
    }
}

#[async_trait]
impl MicSource for FakeMic {
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<f32>>, DeviceError> {
        if let Some(error) = self.fail_with.take() {
            return Err(error);
        }
        self.feed
            .take()
            .ok_or_else(|| DeviceError::Failed("microphone already started".to_string()))
    }

    async fn stop(&mut self) {
        *self.stopped.lock().unwrap() = true;
    }
}

/// Frame feed serving a queued script; an exhausted script reads as
/// "nothing ready".
#[derive(Clone)]
pub struct FakeFeed {
    frames: Arc<Mutex<VecDeque<RawFrame>>>,
    grabs: Arc<AtomicUsize>,
}

impl FakeFeed {
    pub fn new() -> Self {
        Self {
            frames: Arc::new(Mutex::new(VecDeque::new())),
            grabs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn push(&self, frame: RawFrame) {
        self.frames.lock().unwrap().push_back(frame);
    }

    pub fn grabs(&self) -> usize {
        self.grabs.load(Ordering::SeqCst)
    }
}

impl Default for FakeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameSource for FakeFeed {
    async fn grab(&mut self) -> Result<Option<RawFrame>, DeviceError> {
        self.grabs.fetch_add(1, Ordering::SeqCst);
        Ok(self.frames.lock().unwrap().pop_front())
    }
}

/// A solid mid-gray frame for tests.
pub fn test_frame(width: u32, height: u32) -> RawFrame {
    RawFrame {
        width,
        height,
        rgba: vec![128; (width * height * 4) as usize],
    }
}

/// One completed render on the fake speaker.
#[derive(Debug, Clone)]
pub struct RenderRecord {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub started: Instant,
    pub ended: Instant,
}

/// Speaker that takes a fixed amount of (tokio) time per chunk and records
/// each render window, so tests can assert ordering and non-overlap.
#[derive(Clone)]
pub struct FakeSpeaker {
    render_time: Duration,
    renders: Arc<Mutex<Vec<RenderRecord>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    released: Arc<Mutex<bool>>,
}

impl FakeSpeaker {
    pub fn new(render_time: Duration) -> Self {
        Self {
            render_time,
            renders: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(Mutex::new(false)),
        }
    }

    pub fn renders(&self) -> Vec<RenderRecord> {
        self.renders.lock().unwrap().clone()
    }

    /// Highest number of renders ever in flight at once.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        *self.released.lock().unwrap()
    }
}

#[async_trait]
impl AudioSink for FakeSpeaker {
    async fn render(&mut self, samples: Vec<f32>, sample_rate: u32) -> Result<(), DeviceError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let started = Instant::now();
        tokio::time::sleep(self.render_time).await;
        let ended = Instant::now();
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.renders.lock().unwrap().push(RenderRecord {
            samples,
            sample_rate,
            started,
            ended,
        });
        Ok(())
    }

    async fn release(&mut self) {
        *self.released.lock().unwrap() = true;
    }
}
