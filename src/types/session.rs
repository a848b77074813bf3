//! Capture session state

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic counter distinguishing successive capture sessions.
///
/// Advanced on every start and stop. Replies associated with an older epoch
/// are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SessionEpoch(u64);

impl SessionEpoch {
    /// Create an epoch from a raw value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw epoch value.
    pub fn value(self) -> u64 {
        self.0
    }

    /// Advance to the next epoch and return it.
    pub fn advance(&mut self) -> SessionEpoch {
        self.0 = self.0.wrapping_add(1);
        *self
    }
}

impl fmt::Display for SessionEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State of a capture session.
///
/// Orthogonal to the connection state: a session may be `Paused` while the
/// connection stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionState {
    /// No session running.
    #[default]
    Idle,
    /// Capture loop running; acknowledgements are counted.
    Collecting,
    /// Capture loop cancelled; progress kept.
    Paused,
    /// Target reached. Terminal for the label.
    Completed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Idle => "Idle",
            SessionState::Collecting => "Collecting",
            SessionState::Paused => "Paused",
            SessionState::Completed => "Completed",
        };
        f.write_str(label)
    }
}

/// What a session does with the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionMode {
    /// Collect `target_count` accepted training samples for a label.
    #[default]
    Collection,
    /// Stream frames for live recognition until stopped.
    Inference,
}

/// Snapshot of one capture session.
///
/// Inference sessions carry an empty label and a zero target.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CaptureSession {
    /// Session mode
    pub mode: SessionMode,
    /// Gesture label being collected
    pub label: String,
    /// Number of accepted samples that completes the session
    pub target_count: u32,
    /// Accepted samples so far, in `0..=target_count`
    pub collected_count: u32,
    /// Current state
    pub state: SessionState,
    /// Epoch the session runs under
    pub epoch: SessionEpoch,
}

impl CaptureSession {
    /// Remaining samples before completion.
    pub fn remaining(&self) -> u32 {
        self.target_count.saturating_sub(self.collected_count)
    }

    /// Returns true once the target has been reached.
    pub fn target_reached(&self) -> bool {
        self.mode == SessionMode::Collection && self.collected_count >= self.target_count
    }

    /// Completion ratio in `[0, 1]`. Always 0 for inference sessions.
    pub fn progress(&self) -> f64 {
        if self.mode != SessionMode::Collection || self.target_count == 0 {
            return 0.0;
        }
        f64::from(self.collected_count.min(self.target_count)) / f64::from(self.target_count)
    }
}
