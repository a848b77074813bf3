//! Test utilities: an in-memory transport and scripted frame sources
//!
//! [`MockConnector`] stands in for the WebSocket transport. Every accepted
//! handshake yields a [`MockPeer`] playing the backend's side of that link:
//! it observes the frames the client sent and injects replies, errors and
//! closes.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

use crate::source::FrameSource;
use crate::transport::{Connector, Link, TransportEvent, TransportSink};
use crate::types::CloseCode;
use crate::{Result, StreamError};

/// Small JPEG-looking payload used when a test does not care about frame content.
pub const TEST_FRAME: &[u8] = &[0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10];

/// What the client wrote to a mock link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wire {
    Text(String),
    Close { code: CloseCode, reason: String },
}

#[derive(Default)]
struct ConnectorState {
    refusals: usize,
    refuse_all: bool,
    handshake_delay: Duration,
    attempts: Vec<Instant>,
}

/// Scripted in-memory connector.
///
/// Accepts every handshake unless told otherwise.
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl MockConnector {
    /// Create a connector and the receiver of its accepted peers.
    pub fn new() -> (Self, MockPeers) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Self { state: Arc::default(), peers };
        (connector, MockPeers { rx })
    }

    /// Refuse the next `count` handshakes.
    pub fn refuse_next(&self, count: usize) {
        self.lock().refusals += count;
    }

    /// Refuse every handshake until switched back.
    pub fn refuse_all(&self, refuse: bool) {
        self.lock().refuse_all = refuse;
    }

    /// Delay every handshake by `delay`.
    pub fn set_handshake_delay(&self, delay: Duration) {
        self.lock().handshake_delay = delay;
    }

    /// Instants at which handshakes began.
    pub fn attempts(&self) -> Vec<Instant> {
        self.lock().attempts.clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.lock().attempts.len()
    }

    fn lock(&self) -> MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<Link> {
        let delay = {
            let mut state = self.lock();
            state.attempts.push(Instant::now());
            state.handshake_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let refused = {
            let mut state = self.lock();
            if state.refuse_all {
                true
            } else if state.refusals > 0 {
                state.refusals -= 1;
                true
            } else {
                false
            }
        };
        if refused {
            return Err(StreamError::transport(format!("connection to {url} refused")));
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let _ = self.peers.send(MockPeer { sent: sent_rx, inbound: inbound_tx });

        Ok(Link::new(MockSink { sent: sent_tx }, inbound_rx))
    }
}

/// Receiver of accepted peers, one per successful handshake.
pub struct MockPeers {
    rx: mpsc::UnboundedReceiver<MockPeer>,
}

impl MockPeers {
    /// Wait for the next accepted link.
    pub async fn accept(&mut self) -> Option<MockPeer> {
        self.rx.recv().await
    }

    pub fn try_accept(&mut self) -> Option<MockPeer> {
        self.rx.try_recv().ok()
    }
}

struct MockSink {
    sent: mpsc::UnboundedSender<Wire>,
}

#[async_trait::async_trait]
impl TransportSink for MockSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.sent.send(Wire::Text(text)).map_err(|_| StreamError::transport("mock peer dropped"))
    }

    async fn close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        self.sent
            .send(Wire::Close { code, reason: reason.to_string() })
            .map_err(|_| StreamError::transport("mock peer dropped"))
    }
}

/// Backend side of one mock link.
pub struct MockPeer {
    sent: mpsc::UnboundedReceiver<Wire>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl MockPeer {
    /// Wait for the next thing the client wrote.
    pub async fn recv(&mut self) -> Option<Wire> {
        self.sent.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Wire> {
        self.sent.try_recv().ok()
    }

    /// Drain everything written so far.
    pub fn drain(&mut self) -> Vec<Wire> {
        let mut written = Vec::new();
        while let Ok(wire) = self.sent.try_recv() {
            written.push(wire);
        }
        written
    }

    /// Reply with a JSON value as a text message.
    pub fn reply(&self, value: &serde_json::Value) {
        self.reply_text(value.to_string());
    }

    pub fn reply_text(&self, text: impl Into<String>) {
        let _ = self.inbound.send(TransportEvent::Text(text.into()));
    }

    pub fn reply_binary(&self, bytes: impl Into<Vec<u8>>) {
        let _ = self.inbound.send(TransportEvent::Binary(bytes.into()));
    }

    /// Close the link from the backend side.
    pub fn close(&self, code: CloseCode, reason: &str) {
        let _ = self.inbound.send(TransportEvent::Closed { code, reason: reason.to_string() });
    }

    /// Fail the link from the backend side.
    pub fn fail(&self, reason: &str) {
        let _ = self.inbound.send(TransportEvent::Error(reason.to_string()));
    }

    /// Acknowledge every frame with an incrementing cumulative count until
    /// the client closes the link. Resolves to the number of frames seen.
    pub fn spawn_auto_ack(mut self) -> JoinHandle<u64> {
        tokio::spawn(async move {
            let mut samples = 0u64;
            while let Some(wire) = self.sent.recv().await {
                match wire {
                    Wire::Text(_) => {
                        samples += 1;
                        self.reply(&serde_json::json!({ "status": "success", "samples": samples }));
                    }
                    Wire::Close { .. } => break,
                }
            }
            samples
        })
    }
}

/// One scripted frame acquisition.
#[derive(Debug, Clone)]
pub enum SourceStep {
    Frame(Vec<u8>),
    Fail(String),
    /// Never resolves
    Stall,
}

/// Frame source that follows a script, then yields [`TEST_FRAME`] forever.
pub struct ScriptedSource {
    steps: VecDeque<SourceStep>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(steps: impl IntoIterator<Item = SourceStep>) -> Self {
        Self { steps: steps.into_iter().collect(), calls: Arc::default() }
    }

    /// Source that always succeeds.
    pub fn steady() -> Self {
        Self::new([])
    }

    /// Shared counter of acquisitions.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait::async_trait]
impl FrameSource for ScriptedSource {
    async fn next_frame(&mut self) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front() {
            None => Ok(TEST_FRAME.to_vec()),
            Some(SourceStep::Frame(frame)) => Ok(frame),
            Some(SourceStep::Fail(reason)) => Err(StreamError::capture_source(reason)),
            Some(SourceStep::Stall) => std::future::pending().await,
        }
    }
}
