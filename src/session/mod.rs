//! Capture sessions.
//!
//! [`SessionCore`] is the pure state machine: epochs, counts and the reply
//! correlation queue. [`SessionController`] wraps it with the cancellable
//! capture loop and reconciles backend replies as they arrive.

mod controller;
mod machine;

#[cfg(test)]
mod tests;

pub use controller::{SessionConfig, SessionController};
pub use machine::{AckOutcome, IN_FLIGHT_CAPACITY, SessionCore};
