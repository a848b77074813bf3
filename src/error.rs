//! Error types for frame streaming.
//!
//! Every failure in this crate degrades to a state transition plus an
//! observable error; nothing here is fatal to the process. The variants follow
//! four broad categories:
//!
//! - **Transport errors**: handshake, send and link failures. Always recoverable
//!   and the input to the reconnect policy.
//! - **Protocol errors**: malformed inbound payloads. Logged and dropped.
//! - **Exhausted retries**: the reconnect chain gave up. Terminal for that chain
//!   and surfaced to the session controller, which pauses the active session.
//! - **Capture source errors**: a frame could not be acquired. Skipped for that
//!   tick only.
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use framecast::StreamError;
//!
//! let error = StreamError::transport("connection reset by peer");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for streaming operations.
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// Main error type for streaming operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StreamError {
    #[error("Transport failure: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid backend URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Not connected to the backend")]
    NotConnected,

    #[error("Protocol error in {context}: {details}")]
    Protocol { context: String, details: String },

    #[error("Reconnect attempts exhausted after {attempts} attempts")]
    ExhaustedRetries { attempts: u32 },

    #[error("Frame source failure: {reason}")]
    CaptureSource {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Cannot {operation} while session is {state}")]
    InvalidTransition { operation: &'static str, state: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("I/O error: {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StreamError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Transport { .. } => true,
            StreamError::NotConnected => true,
            StreamError::CaptureSource { .. } => true,
            StreamError::Timeout { .. } => true,
            StreamError::Protocol { .. } => false,
            StreamError::InvalidUrl { .. } => false,
            StreamError::ExhaustedRetries { .. } => false,
            StreamError::InvalidTransition { .. } => false,
            StreamError::Config { .. } => false,
            StreamError::Io { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            StreamError::Transport { .. } => vec![
                "Check that the backend is running and reachable",
                "Verify network connectivity",
                "Wait for the automatic reconnect to complete",
            ],
            StreamError::InvalidUrl { .. } => vec![
                "Use a ws:// or wss:// URL",
                "Check the host and port of the backend",
            ],
            StreamError::NotConnected => vec![
                "Call connect() before streaming frames",
                "Wait for the connection to open",
            ],
            StreamError::Protocol { .. } => vec![
                "Check that client and backend versions match",
                "Inspect the raw payload in debug logs",
            ],
            StreamError::ExhaustedRetries { .. } => vec![
                "Restart the backend and call connect() again",
                "Increase max_reconnect_attempts or base_backoff_ms",
                "Resume the paused session once connected",
            ],
            StreamError::CaptureSource { .. } => vec![
                "Check that the camera is available",
                "Verify frame source permissions",
            ],
            StreamError::Timeout { .. } => vec![
                "Increase the timeout duration",
                "Check frame source responsiveness",
            ],
            StreamError::InvalidTransition { .. } => vec![
                "Check the session state before calling this operation",
                "Use start() to begin a new session",
            ],
            StreamError::Config { .. } => vec![
                "Check configuration values against the documented ranges",
                "Remove unknown keys from the configuration file",
            ],
            StreamError::Io { .. } => vec![
                "Check that the file exists and is readable",
                "Check file permissions",
            ],
        }
    }

    /// Helper constructor for transport errors.
    pub fn transport(reason: impl Into<String>) -> Self {
        StreamError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with source.
    pub fn transport_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        StreamError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for URL errors.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        StreamError::InvalidUrl { url: url.into(), reason: reason.into() }
    }

    /// Helper constructor for protocol errors.
    pub fn protocol(context: impl Into<String>, details: impl Into<String>) -> Self {
        StreamError::Protocol { context: context.into(), details: details.into() }
    }

    /// Helper constructor for frame source errors.
    pub fn capture_source(reason: impl Into<String>) -> Self {
        StreamError::CaptureSource { reason: reason.into(), source: None }
    }

    /// Helper constructor for frame source errors with source.
    pub fn capture_source_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        StreamError::CaptureSource { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for invalid state machine transitions.
    pub fn invalid_transition(operation: &'static str, state: impl std::fmt::Display) -> Self {
        StreamError::InvalidTransition { operation, state: state.to_string() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        StreamError::Config { reason: reason.into() }
    }

    /// Helper constructor for I/O errors with path context.
    pub fn io_error(path: PathBuf, source: std::io::Error) -> Self {
        StreamError::Io { path, source }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Io { path: PathBuf::from("<unknown>"), source: err }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Protocol { context: "JSON payload".to_string(), details: err.to_string() }
    }
}

impl From<serde_yaml_ng::Error> for StreamError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        StreamError::Config { reason: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn error_messages_carry_their_context(
                reason in ".*",
                url in "[a-z]{1,12}",
                details in ".*",
                attempts in 0u32..100u32,
                timeout_ms in 1u64..60_000u64
            ) {
                let transport = StreamError::transport(reason.clone());
                prop_assert!(transport.to_string().contains(&reason));

                let bad_url = StreamError::invalid_url(url.clone(), "bad scheme");
                prop_assert!(bad_url.to_string().contains(&url));

                let protocol = StreamError::protocol("inbound message", details.clone());
                prop_assert!(protocol.to_string().contains(&details));

                let exhausted = StreamError::ExhaustedRetries { attempts };
                prop_assert!(exhausted.to_string().contains(&attempts.to_string()));

                let timeout = StreamError::Timeout { duration: Duration::from_millis(timeout_ms) };
                prop_assert!(!timeout.to_string().is_empty());
            }

            #[test]
            fn source_chain_is_preserved(base_message in ".*") {
                let error = StreamError::transport_with_source(
                    "handshake failed",
                    Box::new(std::io::Error::other(base_message.clone())),
                );

                let source = std::error::Error::source(&error);
                prop_assert!(source.is_some());
                prop_assert_eq!(source.map(|s| s.to_string()), Some(base_message));
            }
        }
    }

    #[test]
    fn retry_classification_follows_taxonomy() {
        assert!(StreamError::transport("reset").is_retryable());
        assert!(StreamError::capture_source("camera busy").is_retryable());
        assert!(StreamError::NotConnected.is_retryable());
        assert!(!StreamError::protocol("inbound", "bad json").is_retryable());
        assert!(!StreamError::ExhaustedRetries { attempts: 5 }.is_retryable());
        assert!(!StreamError::invalid_url("http://x", "scheme").is_retryable());
    }

    #[test]
    fn recovery_suggestions_are_descriptive() {
        let errors = [
            StreamError::transport("reset"),
            StreamError::ExhaustedRetries { attempts: 3 },
            StreamError::invalid_transition("pause", "Idle"),
            StreamError::config("cadence is zero"),
        ];

        for error in &errors {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty());
            for suggestion in suggestions {
                assert!(suggestion.len() > 5);
            }
        }
    }

    #[test]
    fn invalid_transition_names_operation_and_state() {
        let error = StreamError::invalid_transition("resume", "Collecting");
        assert_eq!(error.to_string(), "Cannot resume while session is Collecting");
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<StreamError>();
    }

    #[test]
    fn from_conversions_work() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(StreamError::from(json_err), StreamError::Protocol { .. }));

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "frames");
        match StreamError::from(io_err) {
            StreamError::Io { source, .. } => assert_eq!(source.to_string(), "frames"),
            other => panic!("Expected Io variant, got {other:?}"),
        }
    }
}
