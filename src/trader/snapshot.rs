//! Session snapshot push channel.
//!
//! Running paper/live sessions publish `session_update` events over Socket.IO.
//! The chart engine only listens: it subscribes to one session room and forwards
//! every decoded [`SessionSnapshot`] to a channel.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::object::SessionSnapshot;
use super::setting::Settings;

/// Errors ending a snapshot connection
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("snapshot receiver dropped")]
    ReceiverClosed,
}

/// One decoded Engine.IO / Socket.IO text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Engine.IO handshake
    Open,
    /// Engine.IO heartbeat, must be answered with a pong
    Ping,
    /// Socket.IO namespace connect acknowledgement
    Connected,
    /// Socket.IO event with its first argument
    Event { name: String, payload: Value },
    /// Anything the engine does not care about
    Other,
}

/// Decode a text frame received from the server
pub fn decode_frame(text: &str) -> Frame {
    if text.starts_with("40") {
        return Frame::Connected;
    }
    if let Some(body) = text.strip_prefix("42") {
        // Ack ids may sit between the packet type and the payload
        let body = body.trim_start_matches(|c: char| c.is_ascii_digit());
        if let Ok(Value::Array(mut items)) = serde_json::from_str::<Value>(body) {
            if let Some(Value::String(name)) = items.first().cloned() {
                let payload = if items.len() > 1 { items.swap_remove(1) } else { Value::Null };
                return Frame::Event { name, payload };
            }
        }
        return Frame::Other;
    }
    match text.chars().next() {
        Some('0') => Frame::Open,
        Some('2') if text.len() == 1 => Frame::Ping,
        _ => Frame::Other,
    }
}

/// Encode an event emitted by the client
pub fn encode_event(name: &str, payload: Value) -> String {
    format!("42{}", json!([name, payload]))
}

/// Listener for one session's snapshot room
pub struct SnapshotFeed {
    url: String,
    session_id: String,
}

impl SnapshotFeed {
    pub fn new(url: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            session_id: session_id.into(),
        }
    }

    /// Build from `snapshot.url` and `snapshot.session_id`; `None` when unset
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        let url = settings.get_string("snapshot.url").filter(|s| !s.is_empty())?;
        let session_id = settings
            .get_string("snapshot.session_id")
            .filter(|s| !s.is_empty())?;
        Some(Self::new(url, session_id))
    }

    /// Connect, subscribe and forward snapshots until the server closes the
    /// socket or the receiver goes away.
    pub async fn run(&self, sender: mpsc::UnboundedSender<SessionSnapshot>) -> Result<(), SnapshotError> {
        info!("connecting to snapshot channel {}", self.url);
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        while let Some(message) = read.next().await {
            let text = match message? {
                Message::Text(text) => text,
                Message::Close(_) => {
                    warn!("snapshot channel closed by server");
                    break;
                }
                _ => continue,
            };

            match decode_frame(text.as_str()) {
                Frame::Open => {
                    write.send(Message::text("40")).await?;
                }
                Frame::Ping => {
                    write.send(Message::text("3")).await?;
                }
                Frame::Connected => {
                    let subscribe = encode_event(
                        "subscribe_session",
                        json!({ "session_id": self.session_id }),
                    );
                    write.send(Message::text(subscribe)).await?;
                    info!("subscribed to session {}", self.session_id);
                }
                Frame::Event { name, payload } if name == "session_update" => {
                    match serde_json::from_value::<SessionSnapshot>(payload) {
                        Ok(snapshot) => {
                            sender.send(snapshot).map_err(|_| SnapshotError::ReceiverClosed)?;
                        }
                        Err(e) => warn!("undecodable session_update: {}", e),
                    }
                }
                Frame::Event { name, .. } => debug!("ignoring event {}", name),
                Frame::Other => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_engine_frames() {
        assert_eq!(decode_frame(r#"0{"sid":"abc","pingInterval":25000}"#), Frame::Open);
        assert_eq!(decode_frame("2"), Frame::Ping);
        assert_eq!(decode_frame(r#"40{"sid":"xyz"}"#), Frame::Connected);
        assert_eq!(decode_frame("6"), Frame::Other);
    }

    #[test]
    fn test_decode_session_update() {
        let frame = decode_frame(r#"42["session_update",{"session_id":"s1","prices":{"SBIN":601.25}}]"#);
        match frame {
            Frame::Event { name, payload } => {
                assert_eq!(name, "session_update");
                let snapshot: SessionSnapshot = serde_json::from_value(payload).unwrap();
                assert_eq!(snapshot.session_id, "s1");
                assert_eq!(snapshot.prices.get("SBIN"), Some(&601.25));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_encode_event() {
        let text = encode_event("subscribe_session", json!({"session_id": "s1"}));
        assert_eq!(text, r#"42["subscribe_session",{"session_id":"s1"}]"#);
    }

    #[test]
    fn test_from_settings_requires_session() {
        let settings = Settings::in_memory();
        assert!(SnapshotFeed::from_settings(&settings).is_none());
    }
}
