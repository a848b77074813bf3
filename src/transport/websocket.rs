//! WebSocket transport built on tokio-tungstenite

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};
use url::Url;

use super::{Connector, Link, TransportEvent, TransportSink};
use crate::types::CloseCode;
use crate::{Result, StreamError};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector that opens WebSocket links.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
    origin: Option<String>,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self { connect_timeout: Duration::from_secs(10), origin: None }
    }
}

impl WebSocketConnector {
    /// Create a connector with the default 10s handshake timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the handshake timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Send an `Origin` header on the handshake.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Link> {
        let mut request = url.as_str().into_client_request().map_err(|e| {
            StreamError::transport_with_source("failed to build handshake request", Box::new(e))
        })?;

        if let Some(origin) = &self.origin {
            let value = HeaderValue::from_str(origin)
                .map_err(|e| StreamError::invalid_url(url.as_str(), e.to_string()))?;
            request.headers_mut().insert("Origin", value);
        }

        debug!("Opening WebSocket to {}", url);
        let (socket, response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| StreamError::Timeout { duration: self.connect_timeout })?
            .map_err(|e| StreamError::transport_with_source("WebSocket handshake failed", Box::new(e)))?;
        debug!("WebSocket handshake completed ({})", response.status());

        let (write, read) = socket.split();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(read_task(read, event_tx));

        Ok(Link::new(WebSocketSink { write }, event_rx))
    }
}

/// Code and reason of a received close frame. A frame without a status is
/// reported as 1005, which is not an intentional closure.
fn close_details(frame: Option<CloseFrame<'_>>) -> (CloseCode, String) {
    match frame {
        Some(frame) => (CloseCode(u16::from(frame.code)), frame.reason.into_owned()),
        None => (CloseCode::NO_STATUS, String::new()),
    }
}

/// Forward inbound socket messages as transport events until the link ends.
async fn read_task(mut read: SplitStream<Socket>, events: mpsc::UnboundedSender<TransportEvent>) {
    while let Some(message) = read.next().await {
        let event = match message {
            Ok(Message::Text(text)) => TransportEvent::Text(text),
            Ok(Message::Binary(bytes)) => TransportEvent::Binary(bytes),
            Ok(Message::Close(frame)) => {
                let (code, reason) = close_details(frame);
                let _ = events.send(TransportEvent::Closed { code, reason });
                return;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {
                trace!("Control frame received");
                continue;
            }
            Err(e) => {
                warn!("WebSocket read failed: {}", e);
                let _ = events.send(TransportEvent::Error(e.to_string()));
                return;
            }
        };

        if events.send(event).is_err() {
            // Link dropped by the connection manager
            return;
        }
    }
}

struct WebSocketSink {
    write: SplitSink<Socket, Message>,
}

#[async_trait::async_trait]
impl TransportSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.write
            .send(Message::Text(text))
            .await
            .map_err(|e| StreamError::transport_with_source("WebSocket send failed", Box::new(e)))
    }

    async fn close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        let frame =
            CloseFrame { code: WsCloseCode::from(code.as_u16()), reason: Cow::Owned(reason.to_string()) };
        self.write
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| StreamError::transport_with_source("WebSocket close failed", Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_without_status_reconnects() {
        let (code, reason) = close_details(None);
        assert_eq!(code, CloseCode::NO_STATUS);
        assert!(reason.is_empty());
        assert!(!code.is_intentional());
    }

    #[test]
    fn explicit_normal_close_is_intentional() {
        let frame = CloseFrame { code: WsCloseCode::Normal, reason: Cow::Borrowed("bye") };
        let (code, reason) = close_details(Some(frame));
        assert_eq!(code, CloseCode::NORMAL);
        assert_eq!(reason, "bye");
        assert!(code.is_intentional());
    }

    #[test]
    fn other_codes_pass_through() {
        let frame = CloseFrame { code: WsCloseCode::Away, reason: Cow::Borrowed("") };
        assert_eq!(close_details(Some(frame)).0, CloseCode::GOING_AWAY);
    }
}
