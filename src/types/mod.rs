//! Core types shared by the connection manager and the session controller.
//!
//! - [`ConnectionState`] and [`CloseCode`] describe the transport lifecycle
//! - [`ReconnectPolicy`] holds the bounded exponential backoff bookkeeping
//! - [`SessionEpoch`], [`SessionState`], [`SessionMode`] and [`CaptureSession`]
//!   describe a capture session
//!
//! The two state machines are orthogonal: nothing in [`ConnectionState`]
//! implies anything about [`SessionState`] and vice versa.

mod connection_state;
mod reconnect;
mod session;

pub use connection_state::{CloseCode, ConnectionState};
pub use reconnect::ReconnectPolicy;
pub use session::{CaptureSession, SessionEpoch, SessionMode, SessionState};
