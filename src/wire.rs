//! Duplex-connection seam.
//!
//! `Connector`/`Wire` wrap one two-way message channel: open, send text
//! frames, receive events, close with a code and reason. The production
//! implementation rides tokio-tungstenite with the socket split into a
//! write half (kept by the caller) and a read half pumped by a background
//! task into an event channel.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Intentional shutdown by this client.
pub const CLOSE_NORMAL: u16 = 1000;
/// The peer ran out of resources for this session. Terminal.
pub const CLOSE_OVERLOADED: u16 = 1006;
/// Connection dropped without a close frame.
pub const CLOSE_NO_STATUS: u16 = 1005;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),
    #[error("connect failed: {0}")]
    Connect(String),
}

/// Something that happened on the read half of a connection.
#[derive(Debug, Clone)]
pub enum WireEvent {
    /// One inbound text frame.
    Text(String),
    /// The connection ended, with the peer's close code if it sent one.
    Closed { code: u16, reason: String },
}

/// Write half of an open connection.
#[async_trait]
pub trait Wire: Send {
    async fn send_text(&mut self, text: String) -> Result<(), WireError>;
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), WireError>;
}

/// Opens duplex connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn Wire>, mpsc::UnboundedReceiver<WireEvent>), WireError>;
}

type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Production connector over tokio-tungstenite.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn Wire>, mpsc::UnboundedReceiver<WireEvent>), WireError> {
        let (stream, resp) = connect_async(url).await?;
        debug!(status = ?resp.status(), "websocket handshake complete");

        let (sink, mut read) = stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut close_sent = false;
            while let Some(item) = read.next().await {
                match item {
                    Ok(Message::Text(text)) => {
                        if tx.send(WireEvent::Text(text.to_string())).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((CLOSE_NO_STATUS, String::new()));
                        let _ = tx.send(WireEvent::Closed { code, reason });
                        close_sent = true;
                        break;
                    }
                    // Ping/pong and binary frames are not part of the protocol.
                    Ok(_) => {}
                    Err(e) => {
                        let _ = tx.send(WireEvent::Closed {
                            code: CLOSE_NO_STATUS,
                            reason: e.to_string(),
                        });
                        close_sent = true;
                        break;
                    }
                }
            }
            if !close_sent {
                let _ = tx.send(WireEvent::Closed {
                    code: CLOSE_NO_STATUS,
                    reason: "stream ended".to_string(),
                });
            }
        });

        Ok((Box::new(WsWire { sink }), rx))
    }
}

struct WsWire {
    sink: WsSink,
}

#[async_trait]
impl Wire for WsWire {
    async fn send_text(&mut self, text: String) -> Result<(), WireError> {
        self.sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), WireError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.sink.send(Message::Close(Some(frame))).await?;
        self.sink.close().await?;
        Ok(())
    }
}
