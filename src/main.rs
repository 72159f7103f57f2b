//! livelink: terminal client for the video-chat backend.
//!
//! Streams the default microphone and the primary display to the remote
//! service and plays the spoken reply. Lines typed on stdin go out as
//! text messages.

use anyhow::Result;
use livelink::display_feed::DisplayFeed;
use livelink::link::LinkConfig;
use livelink::pulse_io::{PulseMic, PulseSpeaker};
use livelink::session::{LiveSession, SessionConfig, SessionEvent};
use livelink::wire::WsConnector;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let endpoint = std::env::var("LIVELINK_ENDPOINT")
        .unwrap_or_else(|_| "ws://127.0.0.1:8000".to_string());
    let client_id = std::env::var("LIVELINK_CLIENT_ID")
        .unwrap_or_else(|_| format!("cli-{}", std::process::id()));
    info!(%endpoint, %client_id, "starting livelink");

    let config = SessionConfig {
        link: LinkConfig {
            endpoint,
            client_id,
            ..Default::default()
        },
        ..Default::default()
    };

    let (mut session, mut events) = LiveSession::new(
        config,
        Arc::new(WsConnector),
        Box::new(PulseMic::new("livelink")),
        Box::new(DisplayFeed::new()?),
        Box::new(PulseSpeaker::new("livelink")),
    );
    session.start().await?;
    info!("session started; type to chat, Ctrl-C to quit");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = stdin.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if !line.is_empty() && !session.send_text(line).await {
                        error!("message dropped: link not ready");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "stdin read failed");
                    break;
                }
            },
            event = events.recv() => match event {
                Some(SessionEvent::Link(state)) => info!(?state, "link"),
                Some(SessionEvent::Remote(status)) => info!(?status, "remote"),
                Some(SessionEvent::AssistantText(text)) => println!("assistant: {text}"),
                Some(SessionEvent::AssistantTranscript(text)) => {
                    println!("assistant (spoken): {text}")
                }
                Some(SessionEvent::UserTranscript(text)) => println!("you: {text}"),
                Some(SessionEvent::ServerError(message)) => {
                    error!(message = %message, "server error")
                }
                None => break,
            },
        }
    }

    session.stop().await;
    info!("session stopped");
    Ok(())
}
