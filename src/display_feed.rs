//! Live frame feed backed by xcap.
//!
//! Serves the most recent frame from the primary monitor's recorder. The
//! recorder pushes frames continuously; `grab` drains whatever has
//! arrived and keeps only the newest, so the pipeline always ships a
//! fresh still.

use crate::device::{DeviceError, FrameSource, RawFrame};
use async_trait::async_trait;
use std::sync::mpsc::Receiver;
use tracing::info;
use xcap::{Frame, Monitor, VideoRecorder};

pub struct DisplayFeed {
    _recorder: VideoRecorder,
    frames: Receiver<Frame>,
}

impl DisplayFeed {
    /// Open the primary monitor (or the first one found) and start
    /// recording.
    pub fn new() -> Result<Self, DeviceError> {
        let monitors = Monitor::all()
            .map_err(|e| DeviceError::Failed(format!("monitor enumeration: {e}")))?;
        if monitors.is_empty() {
            return Err(DeviceError::NotFound("no monitors found".to_string()));
        }
        let monitor = monitors
            .iter()
            .find(|m| m.is_primary().unwrap_or(false))
            .unwrap_or(&monitors[0])
            .clone();
        let name = monitor.name().unwrap_or_else(|_| "unknown".to_string());
        info!(%name, "capturing display feed");
        let (recorder, frames) = monitor
            .video_recorder()
            .map_err(|e| DeviceError::Failed(format!("recorder: {e}")))?;
        recorder
            .start()
            .map_err(|e| DeviceError::Failed(format!("recorder start: {e}")))?;
        Ok(Self {
            _recorder: recorder,
            frames,
        })
    }
}

#[async_trait]
impl FrameSource for DisplayFeed {
    async fn grab(&mut self) -> Result<Option<RawFrame>, DeviceError> {
        let mut latest = None;
        while let Ok(frame) = self.frames.try_recv() {
            latest = Some(frame);
        }
        Ok(latest.map(|frame| RawFrame {
            width: frame.width,
            height: frame.height,
            rgba: frame.raw,
        }))
    }
}
