//! Session-scoped camera frame streaming to an inference/training backend.
//!
//! Framecast carries encoded camera frames over one WebSocket connection and
//! correlates the backend's asynchronous replies with the capture session
//! that is current when they arrive.
//!
//! # Features
//!
//! - **Connection management**: bounded exponential backoff on unintentional
//!   closes, race-free intentional disconnects
//! - **Send throttling**: frames arriving faster than the throttle interval
//!   are dropped, never queued
//! - **Epoch-guarded sessions**: late acknowledgements from a previous session
//!   can never touch the counters of the current one
//! - **Single-consumer events**: results, progress and errors as one stream
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use framecast::{FrameStreamClient, SessionEvent, StreamConfig};
//! use framecast::sources::StaticSource;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StreamConfig::from_yaml_str("url: ws://127.0.0.1:8001/asl-ws")?;
//!     let client = FrameStreamClient::websocket(config, StaticSource::new(std::fs::read("hand.jpg")?))?;
//!     let mut events = client.events();
//!
//!     client.connect()?;
//!     client.session().start_inference()?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let SessionEvent::Inference(result) = event {
//!             println!("{} ({:.2})", result.label, result.confidence);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod config;
mod error;
pub mod message;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Streaming architecture
pub mod client;
pub mod connection;
pub mod dispatch;
pub mod driver;
pub mod session;
pub mod source;
pub mod sources;
pub mod transport;

// Core exports
pub use config::StreamConfig;
pub use error::*;
pub use message::{Acknowledgement, FrameMessage, InboundMessage, InferenceResult, Landmark};
pub use types::*;

// Component exports
pub use client::FrameStreamClient;
pub use connection::{ConnectionEvent, ConnectionManager, SendOutcome};
pub use dispatch::{Dispatcher, ResultSink, SessionEvent, SessionEvents};
pub use session::{SessionConfig, SessionController};
pub use source::FrameSource;

#[cfg(feature = "websocket")]
pub use transport::WebSocketConnector;
