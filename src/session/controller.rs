//! Capture loop and reply reconciliation

use futures::Stream;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::machine::{AckOutcome, IN_FLIGHT_CAPACITY, SessionCore};
use crate::connection::{ConnectionManager, SendOutcome};
use crate::dispatch::{Dispatcher, ResultSink, SessionEvent};
use crate::message::{Acknowledgement, FrameMessage, InferenceResult};
use crate::source::FrameSource;
use crate::types::{CaptureSession, SessionEpoch, SessionMode};
use crate::{Result, StreamError};

/// Session controller settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Capture loop tick period
    pub cadence: Duration,
    /// Upper bound on one frame acquisition
    pub frame_timeout: Duration,
    /// Target used when none is given
    pub default_target: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { cadence: Duration::from_millis(50), frame_timeout: Duration::from_secs(1), default_target: 120 }
    }
}

struct ControllerState {
    core: SessionCore,
    /// Cancels the capture loop of the current scheduling cycle
    cycle: Option<CancellationToken>,
}

impl ControllerState {
    fn cancel_cycle(&mut self) {
        if let Some(cycle) = self.cycle.take() {
            cycle.cancel();
        }
    }
}

struct Inner<S> {
    config: SessionConfig,
    connection: ConnectionManager,
    source: tokio::sync::Mutex<S>,
    state: Mutex<ControllerState>,
    dispatcher: Dispatcher,
    updates: watch::Sender<CaptureSession>,
}

/// Runs capture sessions on top of a [`ConnectionManager`].
///
/// One capture loop runs at a time. It requests a frame from the source on
/// every tick, hands it to the connection and records the epoch of every
/// transmitted frame so that replies can be reconciled against the session
/// that is current when they arrive.
///
/// Replies reach the controller through its [`ResultSink`] implementation.
pub struct SessionController<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for SessionController<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<S: FrameSource> SessionController<S> {
    pub fn new(
        config: SessionConfig,
        connection: ConnectionManager,
        source: S,
        dispatcher: Dispatcher,
    ) -> Self {
        let (updates, _) = watch::channel(CaptureSession::default());
        let state = ControllerState { core: SessionCore::new(), cycle: None };

        let inner = Inner {
            config,
            connection,
            source: tokio::sync::Mutex::new(source),
            state: Mutex::new(state),
            dispatcher,
            updates,
        };
        Self { inner: Arc::new(inner) }
    }

    /// Start collecting `target` samples for `label`.
    ///
    /// Any running session is stopped first and its counters discarded.
    pub fn start(&self, label: impl Into<String>, target: u32) -> Result<SessionEpoch> {
        self.begin(SessionMode::Collection, label.into(), target)
    }

    /// Start collecting the configured default number of samples.
    pub fn start_default(&self, label: impl Into<String>) -> Result<SessionEpoch> {
        self.start(label, self.inner.config.default_target)
    }

    /// Start streaming frames for live recognition until stopped.
    pub fn start_inference(&self) -> Result<SessionEpoch> {
        self.begin(SessionMode::Inference, String::new(), 0)
    }

    fn begin(&self, mode: SessionMode, label: String, target: u32) -> Result<SessionEpoch> {
        let mut state = self.inner.lock();
        let epoch = state.core.start(mode, label, target)?;
        state.cancel_cycle();
        self.inner.spawn_cycle(&mut state, epoch);

        let snapshot = state.core.snapshot();
        info!("Session {} started: '{}' target {}", epoch, snapshot.label, snapshot.target_count);
        self.inner.publish_update(snapshot);
        Ok(epoch)
    }

    /// Stop the capture loop, keeping progress and epoch.
    pub fn pause(&self) -> Result<()> {
        let mut state = self.inner.lock();
        state.core.pause()?;
        state.cancel_cycle();
        self.inner.publish_update(state.core.snapshot());
        Ok(())
    }

    /// Restart the capture loop of a paused session under the same epoch.
    pub fn resume(&self) -> Result<()> {
        let mut state = self.inner.lock();
        state.core.resume()?;
        let epoch = state.core.epoch();
        self.inner.spawn_cycle(&mut state, epoch);
        self.inner.publish_update(state.core.snapshot());
        Ok(())
    }

    /// End the current episode and return its final snapshot.
    pub fn stop(&self) -> CaptureSession {
        let mut state = self.inner.lock();
        state.cancel_cycle();
        let last = state.core.stop();
        info!("Session {} stopped at {}/{}", last.epoch, last.collected_count, last.target_count);
        self.inner.publish_update(state.core.snapshot());
        last
    }

    /// Current session.
    pub fn snapshot(&self) -> CaptureSession {
        self.inner.lock().core.snapshot()
    }

    /// Stream of session snapshots, starting with the current one.
    pub fn updates(&self) -> impl Stream<Item = CaptureSession> + 'static {
        WatchStream::new(self.inner.updates.subscribe())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Returns true while a capture loop is scheduled.
    pub fn is_capturing(&self) -> bool {
        self.inner.lock().cycle.as_ref().is_some_and(|cycle| !cycle.is_cancelled())
    }
}

impl<S> Inner<S> {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_update(&self, snapshot: CaptureSession) {
        self.updates.send_replace(snapshot);
    }
}

impl<S: FrameSource> Inner<S> {
    fn spawn_cycle(self: &Arc<Self>, state: &mut ControllerState, epoch: SessionEpoch) {
        let cycle = CancellationToken::new();
        state.cycle = Some(cycle.clone());

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.capture_loop(epoch, cycle).await;
        });
    }

    async fn capture_loop(self: Arc<Self>, epoch: SessionEpoch, cycle: CancellationToken) {
        debug!("Capture loop started for session {}", epoch);
        let mut ticker = tokio::time::interval(self.config.cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sent = 0u64;

        loop {
            tokio::select! {
                _ = cycle.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let runnable = self.lock().core.can_tick(epoch);
            if !runnable {
                break;
            }

            match self.tick(epoch, &cycle).await {
                Some(true) => sent += 1,
                Some(false) => {}
                None => break,
            }
        }

        debug!("Capture loop for session {} ended after {} frames", epoch, sent);
    }

    /// Run one capture tick.
    ///
    /// Returns whether a frame was transmitted, or `None` once the loop
    /// should end.
    async fn tick(&self, epoch: SessionEpoch, cycle: &CancellationToken) -> Option<bool> {
        let room = self.lock().core.has_capacity();
        if !room {
            trace!("Tick skipped: {} frames awaiting replies", IN_FLIGHT_CAPACITY);
            return Some(false);
        }

        let acquired = {
            let mut source = self.source.lock().await;
            tokio::select! {
                _ = cycle.cancelled() => return None,
                result = tokio::time::timeout(self.config.frame_timeout, source.next_frame()) => result,
            }
        };

        let payload = match acquired {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                warn!("Frame acquisition failed: {}", e);
                self.dispatcher.publish(SessionEvent::CaptureFailed(e));
                return Some(false);
            }
            Err(_) => {
                let e = StreamError::Timeout { duration: self.config.frame_timeout };
                warn!("Frame acquisition stalled: {}", e);
                self.dispatcher.publish(SessionEvent::CaptureFailed(e));
                return Some(false);
            }
        };

        let frame = FrameMessage::new(payload);
        let mut state = self.lock();
        if !state.core.can_tick(epoch) {
            return None;
        }
        if !state.core.has_capacity() {
            trace!("Tick skipped: reply queue filled during capture");
            return Some(false);
        }

        match self.connection.send_frame(&frame) {
            SendOutcome::Sent => {
                state.core.record_sent(epoch);
                Some(true)
            }
            SendOutcome::Throttled => Some(false),
            SendOutcome::NotConnected => {
                trace!("Tick skipped: not connected");
                Some(false)
            }
        }
    }
}

impl<S: FrameSource> ResultSink for SessionController<S> {
    fn on_acknowledgement(&self, ack: Acknowledgement) {
        let mut state = self.inner.lock();
        match state.core.on_acknowledgement(ack) {
            AckOutcome::Accepted { collected } => {
                trace!("Sample {} accepted ({})", collected, ack.samples);
                let snapshot = state.core.snapshot();
                self.inner.publish_update(snapshot.clone());
                self.inner.dispatcher.publish(SessionEvent::Progress(snapshot));
            }
            AckOutcome::Completed => {
                state.cancel_cycle();
                let snapshot = state.core.snapshot();
                info!("Session {} completed: '{}' {} samples", snapshot.epoch, snapshot.label, snapshot.collected_count);
                self.inner.publish_update(snapshot.clone());
                self.inner.dispatcher.publish(SessionEvent::Completed(snapshot));
            }
            AckOutcome::Stale | AckOutcome::Ignored => {}
        }
    }

    fn on_inference(&self, result: InferenceResult) {
        if self.inner.lock().core.on_inference() {
            self.inner.dispatcher.publish(SessionEvent::Inference(result));
        } else {
            trace!("Stale inference result '{}' dropped", result.label);
        }
    }

    fn on_server_error(&self, message: String) {
        let epoch = self.inner.lock().core.on_server_error();
        warn!("Backend rejected a frame of {:?}: {}", epoch, message);
        self.inner.dispatcher.publish(SessionEvent::Error(StreamError::protocol("backend reply", message)));
    }

    fn on_connection_closed(&self) {
        self.inner.lock().core.on_connection_closed();
    }

    fn on_retries_exhausted(&self, attempts: u32) {
        let error = StreamError::ExhaustedRetries { attempts };
        let mut state = self.inner.lock();

        if state.core.on_hard_failure() {
            state.cancel_cycle();
            let session = state.core.snapshot();
            error!("Session {} stalled at {}/{}: {}", session.epoch, session.collected_count, session.target_count, error);
            self.inner.publish_update(session.clone());
            self.inner.dispatcher.publish(SessionEvent::Stalled { session, error });
        } else {
            error!("{}", error);
            self.inner.dispatcher.publish(SessionEvent::Error(error));
        }
    }
}
