//! Epoch-guarded capture session state machine.
//!
//! [`SessionCore`] holds no timers and performs no I/O. The controller
//! serializes every call behind one lock, so each method observes and mutates
//! a consistent session.

use std::collections::VecDeque;
use tracing::{debug, trace};

use crate::message::Acknowledgement;
use crate::types::{CaptureSession, SessionEpoch, SessionMode, SessionState};
use crate::{Result, StreamError};

/// Frames that may await a reply. Capture holds off while this many are
/// unanswered.
pub const IN_FLIGHT_CAPACITY: usize = 64;

/// What happened to an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Sample counted; the session continues
    Accepted { collected: u32 },
    /// Sample counted and the target reached
    Completed,
    /// Reply belongs to an older epoch or to no frame in flight
    Stale,
    /// Same epoch, but the session could not take the sample
    Ignored,
}

impl AckOutcome {
    /// Returns true if the sample was counted.
    pub fn is_counted(self) -> bool {
        matches!(self, AckOutcome::Accepted { .. } | AckOutcome::Completed)
    }
}

/// Session state plus the reply correlation queue.
///
/// Replies carry no epoch on the wire. Every transmitted frame queues the
/// epoch it was sent under and every per-frame reply dequeues the oldest, so
/// a reply is attributed to the epoch of the frame that triggered it.
#[derive(Debug, Clone, Default)]
pub struct SessionCore {
    session: CaptureSession,
    /// Highest cumulative sample count acknowledged in the current epoch
    last_seen: u64,
    in_flight: VecDeque<SessionEpoch>,
}

impl SessionCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current session.
    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn snapshot(&self) -> CaptureSession {
        self.session.clone()
    }

    pub fn epoch(&self) -> SessionEpoch {
        self.session.epoch
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// Frames awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Begin a new session under a fresh epoch.
    ///
    /// Whatever ran before is implicitly stopped: its counters are dropped and
    /// its in-flight replies become stale. A collection target of zero is
    /// rejected without touching the current session.
    pub fn start(&mut self, mode: SessionMode, label: String, target: u32) -> Result<SessionEpoch> {
        if mode == SessionMode::Collection && target == 0 {
            return Err(StreamError::config("collection target must be greater than zero"));
        }

        let mut epoch = self.session.epoch;
        let epoch = epoch.advance();
        let target_count = match mode {
            SessionMode::Collection => target,
            SessionMode::Inference => 0,
        };

        debug!(
            "Session {} started: {:?} '{}' (previous {} {})",
            epoch, mode, label, self.session.epoch, self.session.state
        );
        self.session = CaptureSession {
            mode,
            label,
            target_count,
            collected_count: 0,
            state: SessionState::Collecting,
            epoch,
        };
        self.last_seen = 0;
        Ok(epoch)
    }

    /// Stop capturing but keep progress and epoch.
    pub fn pause(&mut self) -> Result<()> {
        if self.session.state != SessionState::Collecting {
            return Err(StreamError::invalid_transition("pause", self.session.state));
        }
        self.session.state = SessionState::Paused;
        debug!("Session {} paused at {}/{}", self.session.epoch, self.session.collected_count, self.session.target_count);
        Ok(())
    }

    /// Continue a paused session under the same epoch.
    pub fn resume(&mut self) -> Result<()> {
        if self.session.state != SessionState::Paused {
            return Err(StreamError::invalid_transition("resume", self.session.state));
        }
        self.session.state = SessionState::Collecting;
        debug!("Session {} resumed", self.session.epoch);
        Ok(())
    }

    /// End the current episode.
    ///
    /// Advances the epoch so every reply still in flight becomes stale and
    /// returns the session as it was before stopping.
    pub fn stop(&mut self) -> CaptureSession {
        let last = self.session.clone();
        let mut epoch = self.session.epoch;
        let epoch = epoch.advance();

        self.session = CaptureSession { epoch, ..CaptureSession::default() };
        self.last_seen = 0;
        debug!("Session {} stopped ({} {}/{})", last.epoch, last.state, last.collected_count, last.target_count);
        last
    }

    /// Returns true if the capture loop of `epoch` should run another tick.
    pub fn can_tick(&self, epoch: SessionEpoch) -> bool {
        self.session.epoch == epoch
            && self.session.state == SessionState::Collecting
            && !self.session.target_reached()
    }

    /// Returns true if another frame may be transmitted without losing track
    /// of which epoch its reply belongs to.
    pub fn has_capacity(&self) -> bool {
        self.in_flight.len() < IN_FLIGHT_CAPACITY
    }

    /// Note a frame transmitted under `epoch`.
    ///
    /// Returns false, recording nothing, if the reply queue is full. Every
    /// queued frame will still see its reply, so nothing is ever evicted:
    /// callers check [`has_capacity`](Self::has_capacity) before sending.
    pub fn record_sent(&mut self, epoch: SessionEpoch) -> bool {
        if !self.has_capacity() {
            trace!("Reply queue full, frame of {} not tracked", epoch);
            return false;
        }
        self.in_flight.push_back(epoch);
        true
    }

    /// Apply a training acknowledgement.
    ///
    /// The sample counts only if the reply belongs to the current epoch, the
    /// session is collecting (or paused with the reply already in flight),
    /// the target is not yet reached and the cumulative count increased.
    pub fn on_acknowledgement(&mut self, ack: Acknowledgement) -> AckOutcome {
        let Some(epoch) = self.in_flight.pop_front() else {
            trace!("Acknowledgement {} with nothing in flight", ack.samples);
            return AckOutcome::Stale;
        };
        if epoch != self.session.epoch {
            trace!("Acknowledgement for {} ignored in {}", epoch, self.session.epoch);
            return AckOutcome::Stale;
        }

        let session = &mut self.session;
        let accepting = matches!(session.state, SessionState::Collecting | SessionState::Paused);
        if session.mode != SessionMode::Collection || !accepting || session.target_reached() {
            return AckOutcome::Ignored;
        }
        if ack.samples <= self.last_seen {
            trace!("Acknowledgement {} does not exceed {}", ack.samples, self.last_seen);
            return AckOutcome::Ignored;
        }

        self.last_seen = ack.samples;
        session.collected_count += 1;

        if session.target_reached() {
            session.state = SessionState::Completed;
            debug!("Session {} completed with {} samples", session.epoch, session.collected_count);
            AckOutcome::Completed
        } else {
            AckOutcome::Accepted { collected: session.collected_count }
        }
    }

    /// Attribute an inference reply. Returns true if it belongs to the live
    /// session and should reach the consumer.
    pub fn on_inference(&mut self) -> bool {
        let epoch = self.in_flight.pop_front();
        epoch == Some(self.session.epoch) && self.session.state != SessionState::Idle
    }

    /// Attribute a server error reply. It never changes counts.
    pub fn on_server_error(&mut self) -> Option<SessionEpoch> {
        self.in_flight.pop_front()
    }

    /// Forget frames sent on a link that has closed.
    pub fn on_connection_closed(&mut self) {
        if !self.in_flight.is_empty() {
            trace!("Dropping {} unanswered frames", self.in_flight.len());
            self.in_flight.clear();
        }
    }

    /// Pause after the connection gave up. Returns true if a running
    /// session was paused.
    pub fn on_hard_failure(&mut self) -> bool {
        if self.session.state == SessionState::Collecting {
            self.session.state = SessionState::Paused;
            true
        } else {
            false
        }
    }
}
