//! Transport seam between the connection manager and the socket.
//!
//! The connection manager never touches a socket directly. It asks a
//! [`Connector`] for a [`Link`], writes through the link's [`TransportSink`]
//! and reads [`TransportEvent`]s from its receiver. A link whose event
//! receiver ends without a [`TransportEvent::Closed`] is treated as an
//! abnormal closure.

use tokio::sync::mpsc;
use url::Url;

use crate::Result;
use crate::types::CloseCode;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;

/// Event produced by an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Text message from the peer
    Text(String),
    /// Binary message from the peer
    Binary(Vec<u8>),
    /// Peer closed the link
    Closed { code: CloseCode, reason: String },
    /// Link-level failure; the link is unusable afterwards
    Error(String),
}

/// An established link: a write half and a stream of inbound events.
pub struct Link {
    /// Write half
    pub sink: Box<dyn TransportSink>,
    /// Inbound events, in arrival order
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Link {
    /// Bundle a sink and its event receiver.
    pub fn new(
        sink: impl TransportSink,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { sink: Box::new(sink), events }
    }
}

/// Opens links to the backend.
///
/// Implementations perform the transport handshake. A failed handshake is
/// reported as an `Err` and drives the reconnect policy.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Perform the handshake and return the established link.
    async fn connect(&self, url: &Url) -> Result<Link>;
}

/// Write half of a link.
#[async_trait::async_trait]
pub trait TransportSink: Send + 'static {
    /// Transmit one text message.
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Close the link with the given code.
    async fn close(&mut self, code: CloseCode, reason: &str) -> Result<()>;
}
