//! Frame streaming client.
//!
//! [`FrameStreamClient`] composes the connection manager, the session
//! controller, the dispatcher and the driver task into one owned value. There
//! is no global state: each client owns exactly one logical connection and
//! one session at a time.
//!
//! ```rust,no_run
//! use framecast::{FrameStreamClient, SessionEvent, StreamConfig};
//! use framecast::sources::ReplaySource;
//!
//! # async fn run() -> framecast::Result<()> {
//! let config = StreamConfig { url: Some("ws://10.0.2.2:8001/asl-ws".into()), ..StreamConfig::default() };
//! let source = ReplaySource::open("frames/").await?;
//! let client = FrameStreamClient::websocket(config, source)?;
//! let mut events = client.events();
//!
//! client.connect()?;
//! client.session().start("Hello", 120)?;
//!
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::Completed(session) = event {
//!         println!("collected {} samples", session.collected_count);
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tracing::debug;

use crate::config::StreamConfig;
use crate::connection::ConnectionManager;
use crate::dispatch::{Dispatcher, ResultSink, SessionEvents};
use crate::driver::{Driver, DriverHandle};
use crate::session::SessionController;
use crate::source::FrameSource;
use crate::transport::Connector;
use crate::{Result, StreamError};

/// Owned composition of one connection and one session controller.
///
/// Must be created inside a Tokio runtime. Dropping the client stops
/// the session, closes the connection and ends the driver task.
pub struct FrameStreamClient<S: FrameSource> {
    config: StreamConfig,
    connection: ConnectionManager,
    session: SessionController<S>,
    dispatcher: Dispatcher,
    driver: DriverHandle,
}

impl<S: FrameSource> FrameStreamClient<S> {
    /// Build a client over any transport.
    pub fn new(config: StreamConfig, connector: impl Connector, source: S) -> Result<Self> {
        config.validate()?;

        let (connection, events) = ConnectionManager::new(config.connection(), connector);
        let dispatcher = Dispatcher::new();
        let session = SessionController::new(config.session(), connection.clone(), source, dispatcher.clone());

        let sink: Arc<dyn ResultSink> = Arc::new(session.clone());
        let driver = Driver::spawn(events, sink, dispatcher.clone());

        Ok(Self { config, connection, session, dispatcher, driver })
    }

    /// Build a client over WebSocket, honouring the configured handshake
    /// timeout and `Origin` header.
    #[cfg(feature = "websocket")]
    pub fn websocket(config: StreamConfig, source: S) -> Result<Self> {
        let mut connector =
            crate::transport::WebSocketConnector::new().with_connect_timeout(config.connect_timeout());
        if let Some(origin) = &config.origin {
            connector = connector.with_origin(origin.clone());
        }
        Self::new(config, connector, source)
    }

    /// Connect to the configured URL.
    pub fn connect(&self) -> Result<()> {
        let url = self.config.url.as_deref().ok_or_else(|| StreamError::config("no backend url configured"))?;
        self.connection.connect(url)
    }

    /// Connect to an explicit URL.
    pub fn connect_to(&self, url: &str) -> Result<()> {
        self.connection.connect(url)
    }

    /// Close the connection intentionally. The session is left as is.
    pub fn disconnect(&self, reason: &str) {
        self.connection.disconnect(reason);
    }

    pub fn session(&self) -> &SessionController<S> {
        &self.session
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Register as the event consumer, replacing any previous one.
    pub fn events(&self) -> SessionEvents {
        self.dispatcher.subscribe()
    }
}

impl<S: FrameSource> Drop for FrameStreamClient<S> {
    fn drop(&mut self) {
        debug!("Shutting down frame stream client");
        self.session.stop();
        self.connection.shutdown();
        self.driver.cancel.cancel();
    }
}
