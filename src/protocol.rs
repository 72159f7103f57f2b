//! Wire protocol for the video-chat backend.
//!
//! One JSON message per WebSocket text frame, discriminated by a `type`
//! field. Media payloads travel base64-encoded inside the message body.

use serde::{Deserialize, Serialize};

/// Message sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// One chunk of captured audio, base64 s16-le PCM at 16 kHz mono.
    AudioData { data: String },
    /// One still frame, base64 JPEG.
    VideoFrame { data: String },
    /// A typed chat message.
    TextMessage { text: String },
    /// Connection-health keepalive; the server echoes the timestamp back.
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

/// Message sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    ConnectionStatus {
        status: RemoteStatus,
        #[serde(default)]
        message: Option<String>,
    },
    Response {
        data: ResponsePayload,
    },
    Error {
        message: String,
    },
    Pong {
        #[serde(default)]
        timestamp: Option<u64>,
    },
}

/// Remote-side view of the connection, as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Body of a `response` message. All fields are optional; a single message
/// may carry any combination of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    /// Text reply from the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Transcription of the model's spoken reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    /// Transcription of what the user said.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_transcription: Option<String>,
    /// Base64 s16-le PCM at 24 kHz mono.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_envelopes_carry_type_tag() {
        let json = serde_json::to_value(ClientEnvelope::AudioData {
            data: "QUJD".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "audio_data");
        assert_eq!(json["data"], "QUJD");

        let json = serde_json::to_value(ClientEnvelope::VideoFrame {
            data: "Zg==".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "video_frame");

        let json = serde_json::to_value(ClientEnvelope::TextMessage {
            text: "hello".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "text_message");
        assert_eq!(json["text"], "hello");

        let json = serde_json::to_value(ClientEnvelope::Ping { timestamp: None }).unwrap();
        assert_eq!(json["type"], "ping");
        assert!(json.get("timestamp").is_none());
    }

    #[test]
    fn parses_connection_status() {
        let msg: ServerEnvelope = serde_json::from_str(
            r#"{"type":"connection_status","status":"connected","message":"Successfully connected"}"#,
        )
        .unwrap();
        match msg {
            ServerEnvelope::ConnectionStatus { status, message } => {
                assert_eq!(status, RemoteStatus::Connected);
                assert_eq!(message.as_deref(), Some("Successfully connected"));
            }
            other => panic!("unexpected envelope: {:?}", other),
        }
    }

    #[test]
    fn parses_response_with_partial_fields() {
        let msg: ServerEnvelope = serde_json::from_str(
            r#"{"type":"response","data":{"text":"hi there","audio":"AAAA"}}"#,
        )
        .unwrap();
        match msg {
            ServerEnvelope::Response { data } => {
                assert_eq!(data.text.as_deref(), Some("hi there"));
                assert_eq!(data.audio.as_deref(), Some("AAAA"));
                assert!(data.transcription.is_none());
                assert!(data.user_transcription.is_none());
            }
            other => panic!("unexpected envelope: {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_and_malformed_messages() {
        assert!(serde_json::from_str::<ServerEnvelope>("not json").is_err());
        assert!(serde_json::from_str::<ServerEnvelope>(r#"{"type":"mystery"}"#).is_err());
        // response without its data body is malformed too
        assert!(serde_json::from_str::<ServerEnvelope>(r#"{"type":"response"}"#).is_err());
    }
}
