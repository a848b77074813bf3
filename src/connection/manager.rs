//! Connection manager: one logical link, bounded reconnects, send throttling

use futures::Stream;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_stream::wrappers::{UnboundedReceiverStream, WatchStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::throttle::SendThrottle;
use crate::message::FrameMessage;
use crate::transport::{Connector, Link, TransportEvent};
use crate::types::{CloseCode, ConnectionState, ReconnectPolicy};
use crate::{Result, StreamError};

/// Tunables for the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Minimum interval between transmitted frames
    pub throttle_interval: Duration,
    /// Reconnects attempted before giving up
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect
    pub base_backoff: Duration,
    /// Growth factor between successive reconnect delays
    pub backoff_multiplier: f64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            throttle_interval: Duration::from_millis(300),
            max_reconnect_attempts: 5,
            base_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

/// Observable connection events, delivered in order to a single consumer.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Link established
    Opened,
    /// Raw inbound payload
    Message(Vec<u8>),
    /// Link closed
    Closed { code: CloseCode, reason: String },
    /// Handshake or mid-stream failure
    Error(StreamError),
    /// A reconnect has been scheduled
    Reconnecting { attempt: u32, max_attempts: u32, delay: Duration },
    /// The reconnect chain gave up. Terminal until the next `connect()`.
    RetriesExhausted { attempts: u32 },
}

/// Result of a send request.
///
/// Only [`SendOutcome::Sent`] means the frame went out. The other two are
/// routine outcomes, not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Frame handed to the open link
    Sent,
    /// Dropped because the previous frame went out less than the throttle interval ago
    Throttled,
    /// Dropped because the connection is not open
    NotConnected,
}

impl SendOutcome {
    /// Returns true if the frame was transmitted.
    pub fn is_sent(self) -> bool {
        matches!(self, SendOutcome::Sent)
    }

    /// Convert to a result: `Ok(true)` if sent, `Ok(false)` if throttled and
    /// [`StreamError::NotConnected`] otherwise.
    pub fn into_result(self) -> Result<bool> {
        match self {
            SendOutcome::Sent => Ok(true),
            SendOutcome::Throttled => Ok(false),
            SendOutcome::NotConnected => Err(StreamError::NotConnected),
        }
    }
}

/// Receiving half of the connection event channel.
///
/// There is exactly one per [`ConnectionManager`], handed out at construction.
pub struct ConnectionEvents {
    rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl ConnectionEvents {
    /// Wait for the next event. Returns `None` once the manager is gone.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.try_recv().ok()
    }

    /// Convert into a `Stream` of events.
    pub fn into_stream(self) -> impl Stream<Item = ConnectionEvent> + 'static {
        UnboundedReceiverStream::new(self.rx)
    }
}

enum Outbound {
    Frame(String),
    Close { code: CloseCode, reason: String },
}

struct Shared {
    state: ConnectionState,
    policy: ReconnectPolicy,
    throttle: SendThrottle,
    url: Option<Url>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    /// Bumped for every new link; events from older links are ignored
    generation: u64,
    pending_reconnect: Option<CancellationToken>,
    intentional: bool,
    /// Reason given to `disconnect()` while the close handshake runs
    closing_reason: Option<String>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    shared: Mutex<Shared>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

/// Owner of the single logical backend connection.
///
/// Cloning yields another handle to the same connection. All state lives
/// behind one mutex that is never held across an await point, so `send` is
/// synchronous and never blocks on network I/O.
///
/// Must be used from within a Tokio runtime: `connect()` spawns the link task.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager and the receiver for its events.
    pub fn new(config: ConnectionConfig, connector: impl Connector) -> (Self, ConnectionEvents) {
        Self::with_connector(config, Arc::new(connector))
    }

    /// Create a manager around a shared connector.
    pub fn with_connector(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
    ) -> (Self, ConnectionEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let shared = Shared {
            state: ConnectionState::Disconnected,
            policy: ReconnectPolicy::new(
                config.max_reconnect_attempts,
                config.base_backoff,
                config.backoff_multiplier,
            ),
            throttle: SendThrottle::new(config.throttle_interval),
            url: None,
            outbound: None,
            generation: 0,
            pending_reconnect: None,
            intentional: false,
            closing_reason: None,
        };

        let inner = Inner {
            connector,
            shared: Mutex::new(shared),
            events,
            state_tx,
            shutdown: CancellationToken::new(),
        };

        (Self { inner: Arc::new(inner) }, ConnectionEvents { rx })
    }

    /// Open the connection.
    ///
    /// No-op if already open or connecting. Fails only if the URL is
    /// malformed; handshake failures are reported asynchronously through
    /// [`ConnectionEvent::Error`] and drive the reconnect policy.
    pub fn connect(&self, url: &str) -> Result<()> {
        let url = parse_backend_url(url)?;
        let mut shared = self.inner.lock();

        if shared.state.is_active() {
            debug!("connect() ignored: connection already {}", shared.state);
            return Ok(());
        }

        // A caller-initiated connect starts a fresh retry chain
        shared.intentional = false;
        shared.policy.reset();
        self.inner.begin_connect(&mut shared, url);
        Ok(())
    }

    /// Send raw frame bytes stamped with the current time.
    pub fn send(&self, payload: &[u8]) -> SendOutcome {
        self.send_frame(&FrameMessage::new(payload.to_vec()))
    }

    /// Send a frame, subject to connection state and throttling.
    ///
    /// Never fails: a closed connection or a throttled frame is reported
    /// through the returned [`SendOutcome`].
    pub fn send_frame(&self, frame: &FrameMessage) -> SendOutcome {
        let mut shared = self.inner.lock();

        if !shared.state.is_open() {
            trace!("Send skipped: connection {}", shared.state);
            return SendOutcome::NotConnected;
        }

        let now = Instant::now();
        if !shared.throttle.is_ready(now) {
            trace!("Frame throttled");
            return SendOutcome::Throttled;
        }

        let Some(outbound) = shared.outbound.as_ref() else {
            return SendOutcome::NotConnected;
        };
        if outbound.send(Outbound::Frame(frame.to_wire())).is_err() {
            debug!("Send skipped: link task has exited");
            return SendOutcome::NotConnected;
        }

        shared.throttle.record(now);
        trace!("Frame sent ({} bytes)", frame.payload.len());
        SendOutcome::Sent
    }

    /// Close the connection intentionally.
    ///
    /// Pins the reconnect counter at its maximum and cancels any scheduled
    /// reconnect before closing the link with a normal-closure code.
    pub fn disconnect(&self, reason: &str) {
        let mut shared = self.inner.lock();

        shared.policy.suppress();
        shared.intentional = true;
        if let Some(pending) = shared.pending_reconnect.take() {
            pending.cancel();
        }

        match shared.state {
            ConnectionState::Disconnected | ConnectionState::Closing => {
                debug!("disconnect() while {}: nothing to close", shared.state);
                return;
            }
            ConnectionState::Open => {
                let close = Outbound::Close { code: CloseCode::NORMAL, reason: reason.to_string() };
                if let Some(outbound) = shared.outbound.take()
                    && outbound.send(close).is_ok()
                {
                    shared.closing_reason = Some(reason.to_string());
                    self.inner.set_state(&mut shared, ConnectionState::Closing);
                    info!("Disconnecting: {}", reason);
                    return;
                }
            }
            ConnectionState::Connecting => {}
        }

        // No live link to close: abandon the handshake in flight
        shared.generation += 1;
        shared.outbound = None;
        self.inner.set_state(&mut shared, ConnectionState::Disconnected);
        self.inner.emit(ConnectionEvent::Closed {
            code: CloseCode::NORMAL,
            reason: reason.to_string(),
        });
        info!("Disconnected: {}", reason);
    }

    /// Disconnect and stop every background task owned by this manager.
    pub fn shutdown(&self) {
        self.disconnect("shutdown");
        self.inner.shutdown.cancel();
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Stream of connection states, starting with the current one.
    pub fn state_updates(&self) -> impl Stream<Item = ConnectionState> + 'static {
        WatchStream::new(self.inner.state_tx.subscribe())
    }

    /// Snapshot of the reconnect bookkeeping.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.inner.lock().policy.clone()
    }

    /// URL of the last connect attempt.
    pub fn url(&self) -> Option<Url> {
        self.inner.lock().url.clone()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ConnectionEvent) {
        // No consumer is a valid configuration
        let _ = self.events.send(event);
    }

    fn set_state(&self, shared: &mut Shared, state: ConnectionState) {
        if shared.state != state {
            debug!("Connection {} -> {}", shared.state, state);
            shared.state = state;
            self.state_tx.send_replace(state);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    fn begin_connect(self: &Arc<Self>, shared: &mut Shared, url: Url) {
        if let Some(pending) = shared.pending_reconnect.take() {
            pending.cancel();
        }

        // The link being replaced will never report its own close once the
        // generation moves on
        if matches!(shared.state, ConnectionState::Open | ConnectionState::Closing) {
            let reason = shared.closing_reason.take().unwrap_or_else(|| "superseded".to_string());
            self.emit(ConnectionEvent::Closed { code: CloseCode::NORMAL, reason });
        }

        shared.generation += 1;
        shared.url = Some(url.clone());
        shared.outbound = None;
        self.set_state(shared, ConnectionState::Connecting);

        let inner = Arc::clone(self);
        let generation = shared.generation;
        tokio::spawn(async move {
            inner.run_link(generation, url).await;
        });
    }

    /// Link task: handshake, then pump outbound frames and inbound events
    /// until the link ends.
    async fn run_link(self: Arc<Self>, generation: u64, url: Url) {
        info!("Connecting to {} (link {})", url, generation);

        let connected = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            result = self.connector.connect(&url) => result,
        };

        let Link { mut sink, mut events } = match connected {
            Ok(link) => link,
            Err(e) => {
                warn!("Handshake with {} failed: {}", url, e);
                if self.is_current(generation) {
                    self.emit(ConnectionEvent::Error(e));
                }
                self.handle_close(generation, CloseCode::ABNORMAL, "handshake failed".to_string());
                return;
            }
        };

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let adopted = {
            let mut shared = self.lock();
            let current = shared.generation == generation;
            if current {
                shared.policy.reset();
                shared.outbound = Some(outbound_tx);
                self.set_state(&mut shared, ConnectionState::Open);
                self.emit(ConnectionEvent::Opened);
            }
            current
        };
        if !adopted {
            debug!("Link {} superseded during handshake", generation);
            let _ = sink.close(CloseCode::NORMAL, "superseded").await;
            return;
        }
        info!("Connection open ({})", url);

        let (code, reason) = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = sink.close(CloseCode::NORMAL, "shutdown").await;
                    break (CloseCode::NORMAL, "shutdown".to_string());
                }
                outbound = outbound_rx.recv() => match outbound {
                    Some(Outbound::Frame(text)) => {
                        if let Err(e) = sink.send_text(text).await {
                            warn!("Frame transmission failed: {}", e);
                            self.emit(ConnectionEvent::Error(e));
                            break (CloseCode::ABNORMAL, "send failed".to_string());
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        if let Err(e) = sink.close(code, &reason).await {
                            debug!("Close frame not delivered: {}", e);
                        }
                        break (code, reason);
                    }
                    None => {
                        // Superseded by a newer link
                        let _ = sink.close(CloseCode::NORMAL, "superseded").await;
                        break (CloseCode::NORMAL, "superseded".to_string());
                    }
                },
                event = events.recv() => match event {
                    Some(TransportEvent::Text(text)) => {
                        self.emit(ConnectionEvent::Message(text.into_bytes()));
                    }
                    Some(TransportEvent::Binary(bytes)) => {
                        self.emit(ConnectionEvent::Message(bytes));
                    }
                    Some(TransportEvent::Closed { code, reason }) => break (code, reason),
                    Some(TransportEvent::Error(reason)) => {
                        warn!("Link error: {}", reason);
                        self.emit(ConnectionEvent::Error(StreamError::transport(reason.clone())));
                        break (CloseCode::ABNORMAL, reason);
                    }
                    None => break (CloseCode::ABNORMAL, "link ended without close frame".to_string()),
                },
            }
        };

        self.handle_close(generation, code, reason);
    }

    /// Apply a link closure and, for unintentional closes, schedule the next
    /// reconnect or report exhaustion.
    fn handle_close(self: &Arc<Self>, generation: u64, code: CloseCode, reason: String) {
        let mut shared = self.lock();
        if shared.generation != generation {
            trace!("Ignoring close of superseded link {}", generation);
            return;
        }

        shared.outbound = None;
        shared.closing_reason = None;
        self.set_state(&mut shared, ConnectionState::Disconnected);
        self.emit(ConnectionEvent::Closed { code, reason: reason.clone() });

        if code.is_intentional() || shared.intentional {
            info!("Connection closed ({}): {}", code, reason);
            return;
        }

        let max_attempts = shared.policy.max_attempts();
        match shared.policy.advance() {
            Some((attempt, delay)) => {
                warn!(
                    "Connection lost ({}): {}; reconnect {}/{} in {:?}",
                    code, reason, attempt, max_attempts, delay
                );

                let token = CancellationToken::new();
                shared.pending_reconnect = Some(token.clone());
                self.emit(ConnectionEvent::Reconnecting { attempt, max_attempts, delay });

                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => trace!("Scheduled reconnect cancelled"),
                        _ = inner.shutdown.cancelled() => {}
                        _ = tokio::time::sleep(delay) => inner.reconnect(&token),
                    }
                });
            }
            None => {
                error!("Connection lost ({}): {}; giving up after {} reconnects", code, reason, max_attempts);
                self.emit(ConnectionEvent::RetriesExhausted { attempts: max_attempts });
            }
        }
    }

    fn reconnect(self: &Arc<Self>, token: &CancellationToken) {
        let mut shared = self.lock();
        if token.is_cancelled() || shared.intentional {
            return;
        }
        shared.pending_reconnect = None;

        if shared.state.is_active() {
            return;
        }
        let Some(url) = shared.url.clone() else {
            return;
        };

        info!(
            "Reconnecting to {} (attempt {}/{})",
            url,
            shared.policy.attempt(),
            shared.policy.max_attempts()
        );
        self.begin_connect(&mut shared, url);
    }
}

/// Parse and check a backend URL. Only `ws://` and `wss://` are accepted.
pub fn parse_backend_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| StreamError::invalid_url(raw, e.to_string()))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(StreamError::invalid_url(
                raw,
                format!("unsupported scheme '{other}', expected ws or wss"),
            ));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(StreamError::invalid_url(raw, "missing host"));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_websocket_urls() {
        assert!(parse_backend_url("ws://10.0.2.2:8001/asl-ws").is_ok());
        assert!(parse_backend_url("wss://api.example.com/asl-ws").is_ok());
    }

    #[test]
    fn rejects_malformed_urls() {
        for raw in ["", "not a url", "http://10.0.2.2:8001/asl-ws", "ws://"] {
            let err = parse_backend_url(raw).unwrap_err();
            assert!(matches!(err, StreamError::InvalidUrl { .. }), "{raw} -> {err:?}");
        }
    }

    #[test]
    fn send_outcome_conversion() {
        assert_eq!(SendOutcome::Sent.into_result().unwrap(), true);
        assert_eq!(SendOutcome::Throttled.into_result().unwrap(), false);
        assert!(matches!(SendOutcome::NotConnected.into_result(), Err(StreamError::NotConnected)));
        assert!(!SendOutcome::Throttled.is_sent());
    }
}
