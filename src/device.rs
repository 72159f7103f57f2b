//! Device seams: microphone, live frame feed, and audio output.
//!
//! The pipelines consume these traits; hardware adapters live behind the
//! `devices` feature and test doubles in [`crate::testing`].

use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device access denied: {0}")]
    AccessDenied(String),
    #[error("device not found: {0}")]
    NotFound(String),
    #[error("device failure: {0}")]
    Failed(String),
}

/// Microphone. `start` yields blocks of mono float samples in [-1, 1] at
/// the capture rate; the channel closing means the device stopped
/// producing.
#[async_trait]
pub trait MicSource: Send {
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<f32>>, DeviceError>;
    async fn stop(&mut self);
}

/// One uncompressed still from the live feed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA, row-major.
    pub rgba: Vec<u8>,
}

/// Live video feed.
#[async_trait]
pub trait FrameSource: Send {
    /// Grab the most recent frame. `Ok(None)` while the feed has nothing
    /// ready to read; callers skip the tick.
    async fn grab(&mut self) -> Result<Option<RawFrame>, DeviceError>;
}

/// Audio output. `render` returns only once the device has finished
/// playing the chunk, and implementations must wake a platform-suspended
/// device before rendering. The device resource is created lazily on
/// first render, reused across chunks, and freed by `release`.
#[async_trait]
pub trait AudioSink: Send {
    async fn render(&mut self, samples: Vec<f32>, sample_rate: u32) -> Result<(), DeviceError>;
    async fn release(&mut self);
}
