//! Still-frame capture pipeline.
//!
//! The remote endpoint processes stills, not continuous video, so the
//! cadence is deliberately coarse. Each tick grabs the newest frame from
//! the live feed, compresses it to JPEG, and ships it base64-encoded over
//! the link.

use crate::device::{FrameSource, RawFrame};
use crate::link::LiveLink;
use crate::protocol::ClientEnvelope;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const READY_POLL_ATTEMPTS: u32 = 50;

pub struct VideoPipeline {
    link: LiveLink,
    feed: Option<Box<dyn FrameSource>>,
    tick: Duration,
    jpeg_quality: u8,
    enabled: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl VideoPipeline {
    pub fn new(
        link: LiveLink,
        feed: Box<dyn FrameSource>,
        tick: Duration,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            link,
            feed: Some(feed),
            tick,
            jpeg_quality,
            enabled: Arc::new(AtomicBool::new(true)),
            task: None,
        }
    }

    pub fn start(&mut self) {
        let Some(feed) = self.feed.take() else {
            return;
        };
        self.task = Some(tokio::spawn(run(
            self.link.clone(),
            feed,
            self.enabled.clone(),
            self.tick,
            self.jpeg_quality,
        )));
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(
    link: LiveLink,
    mut feed: Box<dyn FrameSource>,
    enabled: Arc<AtomicBool>,
    tick: Duration,
    jpeg_quality: u8,
) {
    // Don't arm the interval until the link can actually accept frames;
    // anything captured earlier would just be dropped by the gate.
    let mut polls = 0;
    while !link.is_ready().await {
        polls += 1;
        if polls >= READY_POLL_ATTEMPTS {
            warn!("link never became ready; video capture disarmed");
            return;
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }

    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if !enabled.load(Ordering::Relaxed) || !link.is_ready().await {
            continue;
        }
        match feed.grab().await {
            Ok(Some(frame)) if frame.width > 0 && frame.height > 0 => {
                match encode_jpeg(&frame, jpeg_quality) {
                    Ok(jpeg) => {
                        let data = BASE64.encode(&jpeg);
                        if !link.send(&ClientEnvelope::VideoFrame { data }).await {
                            debug!("video frame dropped by readiness gate");
                        }
                    }
                    Err(e) => warn!(error = %e, "jpeg encode failed"),
                }
            }
            // feed not ready to read yet; normal during startup
            Ok(_) => {}
            Err(e) => warn!(error = %e, "frame grab failed"),
        }
    }
}

fn encode_jpeg(frame: &RawFrame, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut rgb = Vec::with_capacity(frame.rgba.len() / 4 * 3);
    for px in frame.rgba.chunks_exact(4) {
        rgb.extend_from_slice(&px[..3]);
    }
    let mut out = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    encoder.encode(&rgb, frame.width, frame.height, image::ExtendedColorType::Rgb8)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LinkConfig, LiveLink};
    use crate::testing::{test_frame, FakeConnector, FakeFeed};

    fn link_config(settle_ms: u64) -> LinkConfig {
        LinkConfig {
            endpoint: "ws://test.invalid".to_string(),
            client_id: "t1".to_string(),
            settle_delay: Duration::from_millis(settle_ms),
            reconnect_delay: Duration::from_secs(3),
        }
    }

    fn sent_frames(connector: &Arc<FakeConnector>) -> Vec<Vec<u8>> {
        connector
            .last_wire()
            .sent_texts()
            .iter()
            .filter_map(|text| {
                let json: serde_json::Value = serde_json::from_str(text).ok()?;
                if json["type"] != "video_frame" {
                    return None;
                }
                BASE64.decode(json["data"].as_str()?).ok()
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_readiness_then_sends_jpeg_frames() {
        let connector = FakeConnector::new();
        let (link, _events) = LiveLink::new(link_config(1500), connector.clone());
        link.open().await;

        let feed = FakeFeed::new();
        feed.push(test_frame(8, 6));
        let mut pipeline =
            VideoPipeline::new(link, Box::new(feed.clone()), Duration::from_secs(1), 80);
        pipeline.start();

        // still inside the settling delay: no grabs, no sends
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(feed.grabs(), 0);
        assert!(sent_frames(&connector).is_empty());

        tokio::time::sleep(Duration::from_millis(800)).await;
        let frames = sent_frames(&connector);
        assert_eq!(frames.len(), 1);
        // JPEG magic bytes
        assert_eq!(&frames[0][..2], &[0xFF, 0xD8]);
        pipeline.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unready_feed_and_empty_frames_are_skipped_silently() {
        let connector = FakeConnector::new();
        let (link, _events) = LiveLink::new(link_config(10), connector.clone());
        link.open().await;

        let feed = FakeFeed::new();
        feed.push(test_frame(0, 0)); // zero-dimension: transient startup state
        let mut pipeline =
            VideoPipeline::new(link, Box::new(feed.clone()), Duration::from_secs(1), 80);
        pipeline.start();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(feed.grabs() >= 2);
        assert!(sent_frames(&connector).is_empty());

        feed.push(test_frame(4, 4));
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(sent_frames(&connector).len(), 1);
        pipeline.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_pipeline_captures_nothing() {
        let connector = FakeConnector::new();
        let (link, _events) = LiveLink::new(link_config(10), connector.clone());
        link.open().await;

        let feed = FakeFeed::new();
        feed.push(test_frame(4, 4));
        let mut pipeline =
            VideoPipeline::new(link, Box::new(feed.clone()), Duration::from_secs(1), 80);
        pipeline.set_enabled(false);
        pipeline.start();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(feed.grabs(), 0);

        pipeline.set_enabled(true);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(sent_frames(&connector).len(), 1);
        pipeline.stop().await;
    }

    #[test]
    fn jpeg_encoder_produces_a_decodable_image() {
        let jpeg = encode_jpeg(&test_frame(16, 9), 80).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.width(), 16);
        assert_eq!(decoded.height(), 9);
    }
}
