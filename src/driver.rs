//! Driver task wiring connection events into the session and the consumer

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::connection::{ConnectionEvent, ConnectionEvents};
use crate::dispatch::{self, Dispatcher, ResultSink, SessionEvent};

/// Handle to a spawned driver task
pub struct DriverHandle {
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
    /// The event pump task
    pub task: JoinHandle<()>,
}

/// Driver pumps connection events to the result sink and the dispatcher
///
/// Owns the connection's event receiver, so every inbound message is handled
/// once and in arrival order. Handling never waits on network I/O.
pub struct Driver;

impl Driver {
    /// Spawn the event pump.
    pub fn spawn(events: ConnectionEvents, sink: Arc<dyn ResultSink>, dispatcher: Dispatcher) -> DriverHandle {
        let cancel = CancellationToken::new();
        let cancel_pump = cancel.clone();

        let task = tokio::spawn(async move {
            Self::event_pump(events, sink, dispatcher, cancel_pump).await;
        });

        DriverHandle { cancel, task }
    }

    async fn event_pump(
        mut events: ConnectionEvents,
        sink: Arc<dyn ResultSink>,
        dispatcher: Dispatcher,
        cancel: CancellationToken,
    ) {
        info!("Driver started");
        let mut messages = 0u64;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Driver cancelled");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        debug!("Connection event channel closed");
                        break;
                    }
                },
            };

            match event {
                ConnectionEvent::Opened => {
                    dispatcher.publish(SessionEvent::Connected);
                }
                ConnectionEvent::Message(raw) => {
                    messages += 1;
                    trace!("Inbound message {} ({} bytes)", messages, raw.len());
                    dispatch::route(&raw, sink.as_ref(), &dispatcher);
                }
                ConnectionEvent::Closed { code, reason } => {
                    sink.on_connection_closed();
                    dispatcher.publish(SessionEvent::Disconnected { code, reason });
                }
                ConnectionEvent::Error(error) => {
                    dispatcher.publish(SessionEvent::Error(error));
                }
                ConnectionEvent::Reconnecting { attempt, max_attempts, delay } => {
                    dispatcher.publish(SessionEvent::Reconnecting { attempt, max_attempts, delay });
                }
                ConnectionEvent::RetriesExhausted { attempts } => {
                    sink.on_retries_exhausted(attempts);
                }
            }
        }

        info!("Driver stopped after {} inbound messages", messages);
    }
}
