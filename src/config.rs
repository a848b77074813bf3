//! Streaming configuration.
//!
//! Every field has a default, so an empty YAML document is a valid
//! configuration:
//!
//! ```yaml
//! url: ws://10.0.2.2:8001/asl-ws
//! throttle_interval_ms: 300
//! capture_cadence_ms: 50
//! target_samples: 120
//! max_reconnect_attempts: 5
//! base_backoff_ms: 2000
//! backoff_multiplier: 2.0
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::connection::{ConnectionConfig, parse_backend_url};
use crate::session::SessionConfig;
use crate::{Result, StreamError};

const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 300;
const DEFAULT_CAPTURE_CADENCE_MS: u64 = 50;
const DEFAULT_TARGET_SAMPLES: u32 = 120;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_BASE_BACKOFF_MS: u64 = 2000;
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_FRAME_TIMEOUT_MS: u64 = 1000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Configuration for a frame streaming client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// Backend WebSocket URL
    pub url: Option<String>,
    /// Minimum interval between transmitted frames
    pub throttle_interval_ms: u64,
    /// Capture loop tick period
    pub capture_cadence_ms: u64,
    /// Default target for collection sessions
    pub target_samples: u32,
    /// Reconnects attempted before giving up
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect
    pub base_backoff_ms: u64,
    /// Growth factor between reconnect delays
    pub backoff_multiplier: f64,
    /// Upper bound on one frame acquisition
    pub frame_timeout_ms: u64,
    /// Upper bound on the WebSocket handshake
    pub connect_timeout_ms: u64,
    /// `Origin` header sent on the handshake
    pub origin: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            throttle_interval_ms: DEFAULT_THROTTLE_INTERVAL_MS,
            capture_cadence_ms: DEFAULT_CAPTURE_CADENCE_MS,
            target_samples: DEFAULT_TARGET_SAMPLES,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_backoff_ms: DEFAULT_BASE_BACKOFF_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            frame_timeout_ms: DEFAULT_FRAME_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            origin: None,
        }
    }
}

impl StreamConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: StreamConfig = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StreamError::io_error(path.to_path_buf(), e))?;
        Self::from_yaml_str(&yaml)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.capture_cadence_ms == 0 {
            return Err(StreamError::config("capture_cadence_ms must be greater than zero"));
        }
        if self.target_samples == 0 {
            return Err(StreamError::config("target_samples must be greater than zero"));
        }
        if self.frame_timeout_ms == 0 {
            return Err(StreamError::config("frame_timeout_ms must be greater than zero"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(StreamError::config(format!(
                "backoff_multiplier must be a finite number >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if let Some(url) = &self.url {
            parse_backend_url(url)?;
        }
        Ok(())
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }

    pub fn capture_cadence(&self) -> Duration {
        Duration::from_millis(self.capture_cadence_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Connection manager settings.
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            throttle_interval: self.throttle_interval(),
            max_reconnect_attempts: self.max_reconnect_attempts,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }

    /// Session controller settings.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            cadence: self.capture_cadence(),
            frame_timeout: self.frame_timeout(),
            default_target: self.target_samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = StreamConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, StreamConfig::default());
        assert_eq!(config.throttle_interval(), Duration::from_millis(300));
        assert_eq!(config.capture_cadence(), Duration::from_millis(50));
        assert_eq!(config.target_samples, 120);
    }

    #[test]
    fn partial_document_overrides_fields() {
        let yaml = "url: ws://localhost:8001/asl-ws\nmax_reconnect_attempts: 3\nbackoff_multiplier: 1.5\n";
        let config = StreamConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.url.as_deref(), Some("ws://localhost:8001/asl-ws"));
        let connection = config.connection();
        assert_eq!(connection.max_reconnect_attempts, 3);
        assert_eq!(connection.backoff_multiplier, 1.5);
        assert_eq!(connection.base_backoff, Duration::from_secs(2));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = StreamConfig::from_yaml_str("cadence: 50").unwrap_err();
        assert!(matches!(err, StreamError::Config { .. }));
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let cases = [
            StreamConfig { capture_cadence_ms: 0, ..StreamConfig::default() },
            StreamConfig { target_samples: 0, ..StreamConfig::default() },
            StreamConfig { frame_timeout_ms: 0, ..StreamConfig::default() },
            StreamConfig { backoff_multiplier: 0.5, ..StreamConfig::default() },
            StreamConfig { backoff_multiplier: f64::NAN, ..StreamConfig::default() },
        ];
        for config in cases {
            assert!(matches!(config.validate(), Err(StreamError::Config { .. })), "{config:?}");
        }

        let http = StreamConfig { url: Some("http://localhost/asl-ws".into()), ..StreamConfig::default() };
        assert!(matches!(http.validate(), Err(StreamError::InvalidUrl { .. })));
    }

    #[test]
    fn session_settings_follow_config() {
        let config = StreamConfig { capture_cadence_ms: 20, target_samples: 30, ..StreamConfig::default() };
        let session = config.session();
        assert_eq!(session.cadence, Duration::from_millis(20));
        assert_eq!(session.default_target, 30);
        assert_eq!(session.frame_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("framecast.yaml");
        std::fs::write(&path, "target_samples: 10\n").unwrap();

        let config = StreamConfig::from_path(&path).await.unwrap();
        assert_eq!(config.target_samples, 10);

        let missing = StreamConfig::from_path(dir.path().join("absent.yaml")).await.unwrap_err();
        assert!(matches!(missing, StreamError::Io { .. }));
    }
}
