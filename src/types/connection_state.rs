//! Connection lifecycle state and close codes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the logical backend connection.
///
/// Owned solely by the connection manager. Transitions happen only on
/// transport events or explicit `connect()`/`disconnect()` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link and no handshake in flight.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Link established; frames may be sent.
    Open,
    /// Intentional close requested, waiting for the link to finish.
    Closing,
}

impl ConnectionState {
    /// Returns true if the connection can transmit frames.
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Returns true if `connect()` would be a no-op in this state.
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Connecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Open => "Open",
            ConnectionState::Closing => "Closing",
        };
        f.write_str(label)
    }
}

/// WebSocket close code.
///
/// Only [`CloseCode::NORMAL`] counts as an intentional closure; every other
/// code drives the reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// Normal closure (1000).
    pub const NORMAL: CloseCode = CloseCode(1000);
    /// Endpoint going away (1001).
    pub const GOING_AWAY: CloseCode = CloseCode(1001);
    /// Close frame without a status code (1005).
    pub const NO_STATUS: CloseCode = CloseCode(1005);
    /// Abnormal closure without a close frame (1006). Used locally for
    /// handshake failures and links that end without a close frame.
    pub const ABNORMAL: CloseCode = CloseCode(1006);
    /// Server internal error (1011).
    pub const INTERNAL_ERROR: CloseCode = CloseCode(1011);

    /// Returns true if this close was intentional and must not trigger a reconnect.
    pub fn is_intentional(self) -> bool {
        self == CloseCode::NORMAL
    }

    /// Raw numeric code.
    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        CloseCode(code)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
