//! livelink: real-time bidirectional media-streaming client.
//!
//! Captures microphone audio and live video frames, streams them over a
//! persistent duplex WebSocket to a remote AI chat service, and plays the
//! streamed audio reply back in strict arrival order without overlap.

#![forbid(unsafe_code)]

/// Microphone capture pipeline
pub mod audio_capture;
/// Device traits consumed by the pipelines
pub mod device;
/// Transport session lifecycle and readiness gating
pub mod link;
/// PCM quantization helpers
pub mod pcm;
/// Strictly ordered playback of response audio
pub mod playback;
/// JSON wire envelopes
pub mod protocol;
/// Session controller
pub mod session;
/// Test doubles for the transport and device seams
pub mod testing;
/// Still-frame capture pipeline
pub mod video_capture;
/// Duplex connection abstraction and the WebSocket adapter
pub mod wire;

/// Live frame feed on the primary display (requires the `devices` feature)
#[cfg(feature = "devices")]
pub mod display_feed;
/// PulseAudio microphone and speaker (requires the `devices` feature)
#[cfg(feature = "devices")]
pub mod pulse_io;
