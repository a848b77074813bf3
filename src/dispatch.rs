//! Result dispatch.
//!
//! Inbound payloads are parsed once and routed to a [`ResultSink`], which is
//! the session controller in a running client. Everything the consumer should
//! see is published through the [`Dispatcher`] as a [`SessionEvent`].
//!
//! The dispatcher has at most one consumer. Subscribing again replaces the
//! previous consumer, whose stream then ends. Publishing never blocks.

use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::StreamError;
use crate::message::{Acknowledgement, InboundMessage, InferenceResult};
use crate::types::{CaptureSession, CloseCode};

/// Event delivered to the consumer.
#[derive(Debug)]
pub enum SessionEvent {
    /// Connection to the backend opened
    Connected,
    /// Connection closed
    Disconnected { code: CloseCode, reason: String },
    /// A reconnect has been scheduled
    Reconnecting { attempt: u32, max_attempts: u32, delay: Duration },
    /// Recognition result for the live session
    Inference(InferenceResult),
    /// A sample was accepted
    Progress(CaptureSession),
    /// The session reached its target
    Completed(CaptureSession),
    /// The connection gave up and the running session was paused
    Stalled { session: CaptureSession, error: StreamError },
    /// A frame could not be acquired; the tick was skipped
    CaptureFailed(StreamError),
    /// Recoverable error: transport failure, malformed payload or backend rejection
    Error(StreamError),
}

/// Receives parsed replies and connection milestones.
///
/// Every method runs to completion without waiting on I/O.
pub trait ResultSink: Send + Sync + 'static {
    /// Training acknowledgement
    fn on_acknowledgement(&self, ack: Acknowledgement);

    /// Recognition result
    fn on_inference(&self, result: InferenceResult);

    /// Backend could not process a frame
    fn on_server_error(&self, message: String);

    /// The link closed; no reply for frames sent on it will arrive
    fn on_connection_closed(&self);

    /// The reconnect chain gave up
    fn on_retries_exhausted(&self, attempts: u32);
}

/// Single-consumer, non-blocking event fan-in.
#[derive(Clone, Default)]
pub struct Dispatcher {
    consumer: Arc<Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the consumer, replacing any previous one.
    pub fn subscribe(&self) -> SessionEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.lock().replace(tx).is_some() {
            debug!("Event consumer replaced");
        }
        SessionEvents { rx }
    }

    /// Returns true if a consumer is listening.
    pub fn has_consumer(&self) -> bool {
        self.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Deliver an event. Returns false if nobody is listening.
    pub fn publish(&self, event: SessionEvent) -> bool {
        let mut consumer = self.lock();
        let Some(tx) = consumer.as_ref() else {
            trace!("No consumer for {:?}", event);
            return false;
        };

        if tx.send(event).is_err() {
            debug!("Event consumer gone");
            *consumer = None;
            return false;
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<SessionEvent>>> {
        self.consumer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Consumer side of the dispatcher.
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    /// Wait for the next event. Returns `None` once replaced or shut down.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for SessionEvents {
    type Item = SessionEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Parse an inbound payload and route it.
///
/// Malformed payloads are published as [`SessionEvent::Error`] and reach
/// neither the sink nor any session state.
pub fn route(raw: &[u8], sink: &dyn ResultSink, dispatcher: &Dispatcher) {
    match InboundMessage::parse(raw) {
        Ok(InboundMessage::Acknowledgement(ack)) => sink.on_acknowledgement(ack),
        Ok(InboundMessage::Inference(result)) => sink.on_inference(result),
        Ok(InboundMessage::ServerError { message }) => sink.on_server_error(message),
        Err(e) => {
            warn!("Dropping malformed reply ({} bytes): {}", raw.len(), e);
            trace!("Malformed reply: {}", String::from_utf8_lossy(raw));
            dispatcher.publish(SessionEvent::Error(e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ResultSink for RecordingSink {
        fn on_acknowledgement(&self, ack: Acknowledgement) {
            self.record(format!("ack {}", ack.samples));
        }
        fn on_inference(&self, result: InferenceResult) {
            self.record(format!("inference {}", result.label));
        }
        fn on_server_error(&self, message: String) {
            self.record(format!("error {message}"));
        }
        fn on_connection_closed(&self) {
            self.record("closed".to_string());
        }
        fn on_retries_exhausted(&self, attempts: u32) {
            self.record(format!("exhausted {attempts}"));
        }
    }

    #[test]
    fn routes_by_message_shape() {
        let sink = RecordingSink::default();
        let dispatcher = Dispatcher::new();

        route(br#"{"samples": 3}"#, &sink, &dispatcher);
        route(br#"{"gesture": "Thanks", "confidence": 0.8, "hand_detected": true}"#, &sink, &dispatcher);
        route(br#"{"error": "No frame data"}"#, &sink, &dispatcher);

        assert_eq!(sink.calls(), ["ack 3", "inference Thanks", "error No frame data"]);
    }

    #[test]
    fn malformed_payload_reaches_only_the_consumer() {
        let sink = RecordingSink::default();
        let dispatcher = Dispatcher::new();
        let mut events = dispatcher.subscribe();

        route(b"{not json", &sink, &dispatcher);

        assert!(sink.calls().is_empty());
        assert!(matches!(events.try_recv(), Some(SessionEvent::Error(StreamError::Protocol { .. }))));
    }

    #[test]
    fn publish_without_consumer_is_dropped() {
        let dispatcher = Dispatcher::new();
        assert!(!dispatcher.has_consumer());
        assert!(!dispatcher.publish(SessionEvent::Connected));
    }

    #[test]
    fn resubscribing_replaces_the_consumer() {
        let dispatcher = Dispatcher::new();
        let mut first = dispatcher.subscribe();
        let mut second = dispatcher.subscribe();

        assert!(dispatcher.publish(SessionEvent::Connected));
        assert!(second.try_recv().is_some());
        assert!(first.try_recv().is_none());
    }

    #[test]
    fn dropped_consumer_is_forgotten() {
        let dispatcher = Dispatcher::new();
        drop(dispatcher.subscribe());
        assert!(!dispatcher.publish(SessionEvent::Connected));
        assert!(!dispatcher.has_consumer());
    }
}
