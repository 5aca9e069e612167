// crates/grapevine-publish/src/relay.rs
//
// WebSocket relay transport speaking the NIP-01 publish exchange:
//   client -> ["EVENT", <event>]
//   relay  -> ["OK", <event id>, <true|false>, <message>]
// Other relay frames (NOTICE, AUTH, ...) are ignored while waiting.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use grapevine_core::error::GrapevineError;

use crate::events::OutboundEvent;
use crate::transport::{RelayConnection, RelayTransport, Verdict};

/// Opens plain WebSocket connections to relays.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl RelayTransport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn RelayConnection>, GrapevineError> {
        let (ws, _) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| GrapevineError::Transport(format!("timed out connecting to {}", url)))?
            .map_err(|e| GrapevineError::Transport(format!("connect to {} failed: {}", url, e)))?;
        tracing::debug!("Connected to relay {}", url);
        Ok(Box::new(WebSocketConnection {
            url: url.to_string(),
            ws,
        }))
    }
}

struct WebSocketConnection {
    url: String,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketConnection {
    fn transport_error(&self, what: &str, e: impl std::fmt::Display) -> GrapevineError {
        GrapevineError::Transport(format!("{} {}: {}", what, self.url, e))
    }
}

#[async_trait]
impl RelayConnection for WebSocketConnection {
    async fn publish(&mut self, event: &OutboundEvent) -> Result<Verdict, GrapevineError> {
        let frame = serde_json::to_string(&serde_json::json!(["EVENT", event.body()]))?;
        self.ws
            .send(Message::Text(frame))
            .await
            .map_err(|e| self.transport_error("send to", e))?;

        while let Some(msg) = self.ws.next().await {
            match msg.map_err(|e| self.transport_error("read from", e))? {
                Message::Text(text) => {
                    if let Some(verdict) = parse_ok_frame(&text, event.id()) {
                        return Ok(verdict);
                    }
                    tracing::trace!("{}: ignoring frame {}", self.url, text);
                }
                Message::Ping(data) => {
                    self.ws
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| self.transport_error("send to", e))?;
                }
                Message::Close(frame) => {
                    return Err(GrapevineError::Transport(format!(
                        "{} closed the connection: {:?}",
                        self.url, frame
                    )));
                }
                _ => {}
            }
        }

        Err(GrapevineError::Transport(format!(
            "{} closed the connection before answering",
            self.url
        )))
    }
}

/// Parse a relay frame as the `OK` verdict for `event_id`.
///
/// Returns `None` for any other frame, including `OK` for a different event.
pub fn parse_ok_frame(text: &str, event_id: &str) -> Option<Verdict> {
    let frame: Value = serde_json::from_str(text).ok()?;
    let parts = frame.as_array()?;
    if parts.first()?.as_str()? != "OK" || parts.get(1)?.as_str()? != event_id {
        return None;
    }
    let accepted = parts.get(2)?.as_bool()?;
    if accepted {
        Some(Verdict::Accepted)
    } else {
        let message = parts.get(3).and_then(Value::as_str).unwrap_or_default();
        Some(Verdict::Rejected(message.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    #[test]
    fn ok_frames() {
        assert_eq!(
            parse_ok_frame(r#"["OK","abc",true,""]"#, "abc"),
            Some(Verdict::Accepted)
        );
        assert_eq!(
            parse_ok_frame(r#"["OK","abc",false,"blocked: spam"]"#, "abc"),
            Some(Verdict::Rejected("blocked: spam".to_string()))
        );
        assert_eq!(
            parse_ok_frame(r#"["OK","abc",false]"#, "abc"),
            Some(Verdict::Rejected(String::new()))
        );
    }

    #[test]
    fn other_frames_are_ignored() {
        assert_eq!(parse_ok_frame(r#"["OK","other",true,""]"#, "abc"), None);
        assert_eq!(parse_ok_frame(r#"["NOTICE","slow down"]"#, "abc"), None);
        assert_eq!(parse_ok_frame(r#"["OK","abc","yes",""]"#, "abc"), None);
        assert_eq!(parse_ok_frame("not json", "abc"), None);
    }

    /// A one-connection relay that sends a NOTICE, then answers every EVENT
    /// with OK; events whose kind is 1 are rejected.
    async fn spawn_relay() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let frame: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(frame[0], "EVENT");
                let id = frame[1]["id"].as_str().unwrap().to_string();
                let accepted = frame[1]["kind"] != 1;
                ws.send(Message::Text(json!(["NOTICE", "hello"]).to_string()))
                    .await
                    .unwrap();
                let message = if accepted { "" } else { "blocked: kind" };
                let reply = json!(["OK", id, accepted, message]);
                ws.send(Message::Text(reply.to_string())).await.unwrap();
            }
        });
        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn publishes_over_websocket() {
        let url = spawn_relay().await;
        let transport = WebSocketTransport::new(Duration::from_secs(5));
        let mut conn = transport.connect(&url).await.unwrap();

        let good = OutboundEvent::from_value(json!({"id": "e1", "kind": 30382})).unwrap();
        assert_eq!(conn.publish(&good).await.unwrap(), Verdict::Accepted);

        let bad = OutboundEvent::from_value(json!({"id": "e2", "kind": 1})).unwrap();
        assert_eq!(
            conn.publish(&bad).await.unwrap(),
            Verdict::Rejected("blocked: kind".to_string())
        );
    }

    #[tokio::test]
    async fn connect_failure_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = WebSocketTransport::new(Duration::from_secs(5));
        match transport.connect(&format!("ws://{}", addr)).await {
            Err(GrapevineError::Transport(msg)) => assert!(msg.contains("connect to")),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("connected to a closed port"),
        }
    }
}
