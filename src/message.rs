//! Wire messages exchanged with the backend.
//!
//! Outbound frames are compact JSON objects carrying the encoded image as a
//! base64 data URI plus a millisecond timestamp:
//!
//! ```json
//! { "frame": "data:image/jpeg;base64,/9j/4AAQ...", "timestamp": 1718000000000 }
//! ```
//!
//! Inbound messages come in three shapes, distinguished by their keys:
//!
//! - inference replies: `{ "gesture", "confidence", "hand_detected", "landmarks", "timestamp" }`
//! - training acknowledgements: `{ "samples": <cumulative count> }`
//! - server errors: `{ "error": "..." }`

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{Result, StreamError};

/// Prefix the backend expects in front of the base64 frame payload.
pub const DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// One outbound camera frame. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMessage {
    /// Encoded image bytes as produced by the frame source
    pub payload: Vec<u8>,
    /// Client timestamp in Unix milliseconds
    pub sent_at: i64,
}

impl FrameMessage {
    /// Create a frame stamped with the current wall-clock time.
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload, sent_at: unix_millis() }
    }

    /// Create a frame with an explicit timestamp.
    pub fn with_timestamp(payload: Vec<u8>, sent_at: i64) -> Self {
        Self { payload, sent_at }
    }

    /// Serialize to the JSON text sent over the socket.
    pub fn to_wire(&self) -> String {
        let frame = format!("{DATA_URI_PREFIX}{}", STANDARD.encode(&self.payload));
        json!({ "frame": frame, "timestamp": self.sent_at }).to_string()
    }
}

/// A single 3D hand landmark.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawLandmark")]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

// Backends emit either `{x, y, z}` objects or bare `[x, y, z]` triples.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawLandmark {
    Object {
        x: f32,
        y: f32,
        #[serde(default)]
        z: f32,
    },
    Triple([f32; 3]),
}

impl From<RawLandmark> for Landmark {
    fn from(raw: RawLandmark) -> Self {
        match raw {
            RawLandmark::Object { x, y, z } => Landmark { x, y, z },
            RawLandmark::Triple([x, y, z]) => Landmark { x, y, z },
        }
    }
}

/// Transient recognition result, handed to the consumer only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Recognised gesture label ("None" when no hand was seen)
    #[serde(rename = "gesture")]
    pub label: String,
    /// Confidence in `[0, 1]`
    #[serde(default)]
    pub confidence: f32,
    /// Whether a hand was detected in the frame
    #[serde(rename = "hand_detected", default)]
    pub hand_present: bool,
    /// Ordered hand landmarks, if the backend returned any
    #[serde(default)]
    pub landmarks: Option<Vec<Landmark>>,
    /// Backend timestamp (seconds or echoed client milliseconds)
    #[serde(rename = "timestamp", default)]
    pub server_timestamp: f64,
    /// One-way latency measured by the backend, if reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_latency_ms: Option<f64>,
}

impl InferenceResult {
    /// Returns true if the backend recognised an actual gesture.
    pub fn is_recognised(&self) -> bool {
        self.hand_present && !self.label.is_empty() && self.label != "None"
    }
}

/// Cumulative accepted-sample count returned in training mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    /// Total samples the backend holds for the label (not a delta)
    pub samples: u64,
}

/// A parsed inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Live recognition reply
    Inference(InferenceResult),
    /// Training sample acknowledgement
    Acknowledgement(Acknowledgement),
    /// Backend reported it could not process a frame
    ServerError { message: String },
}

impl InboundMessage {
    /// Parse a raw inbound payload.
    ///
    /// Malformed or unrecognised payloads yield [`StreamError::Protocol`].
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(raw)?;
        let Value::Object(object) = value else {
            return Err(StreamError::protocol("inbound message", "expected a JSON object"));
        };

        if let Some(error) = object.get("error") {
            let message = match error {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            return Ok(InboundMessage::ServerError { message });
        }

        if object.contains_key("samples") {
            return parse_acknowledgement(&object).map(InboundMessage::Acknowledgement);
        }

        if object.contains_key("gesture") {
            return parse_inference(object).map(InboundMessage::Inference);
        }

        Err(StreamError::protocol(
            "inbound message",
            "expected one of 'gesture', 'samples' or 'error'",
        ))
    }
}

fn parse_acknowledgement(object: &Map<String, Value>) -> Result<Acknowledgement> {
    object
        .get("samples")
        .and_then(Value::as_u64)
        .map(|samples| Acknowledgement { samples })
        .ok_or_else(|| {
            StreamError::protocol("training acknowledgement", "'samples' must be a non-negative integer")
        })
}

fn parse_inference(object: Map<String, Value>) -> Result<InferenceResult> {
    let mut result: InferenceResult = serde_json::from_value(Value::Object(object))
        .map_err(|e| StreamError::protocol("inference result", e.to_string()))?;

    if !result.confidence.is_finite() {
        return Err(StreamError::protocol("inference result", "confidence is not a finite number"));
    }
    result.confidence = result.confidence.clamp(0.0, 1.0);

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_wire_format_matches_backend() {
        let frame = FrameMessage::with_timestamp(vec![0xff, 0xd8, 0xff], 1_718_000_000_123);
        let wire: Value = serde_json::from_str(&frame.to_wire()).unwrap();

        assert_eq!(wire["timestamp"], json!(1_718_000_000_123i64));
        assert_eq!(wire["frame"], json!("data:image/jpeg;base64,/9j/"));
        assert_eq!(wire.as_object().map(|o| o.len()), Some(2));
    }

    #[test]
    fn new_frames_are_stamped_with_wall_clock() {
        let before = unix_millis();
        let frame = FrameMessage::new(vec![1, 2, 3]);
        assert!(frame.sent_at >= before);
    }

    #[test]
    fn parses_inference_reply() {
        let raw = br#"{
            "timestamp": 1718000000.25,
            "hand_detected": true,
            "gesture": "Hello",
            "confidence": 0.92,
            "landmarks": [{"x": 0.1, "y": 0.2, "z": -0.05}, [0.25, 0.5, 0.0]],
            "processing_times": {"decode_ms": 1.2, "total_ms": 8.4},
            "network_latency_ms": 12.5
        }"#;

        let InboundMessage::Inference(result) = InboundMessage::parse(raw).unwrap() else {
            panic!("expected inference result");
        };
        assert_eq!(result.label, "Hello");
        assert!(result.hand_present);
        assert!(result.is_recognised());
        assert!((result.confidence - 0.92).abs() < 1e-6);
        assert_eq!(result.server_timestamp, 1718000000.25);
        assert_eq!(result.network_latency_ms, Some(12.5));

        let landmarks = result.landmarks.unwrap();
        assert_eq!(landmarks.len(), 2);
        assert_eq!(landmarks[1], Landmark { x: 0.25, y: 0.5, z: 0.0 });
    }

    #[test]
    fn no_hand_reply_is_not_recognised() {
        let raw = br#"{"timestamp": 1.0, "hand_detected": false, "gesture": "None", "confidence": 0.0}"#;
        let InboundMessage::Inference(result) = InboundMessage::parse(raw).unwrap() else {
            panic!("expected inference result");
        };
        assert!(!result.is_recognised());
        assert!(result.landmarks.is_none());
    }

    #[test]
    fn confidence_is_clamped() {
        let raw = br#"{"gesture": "Yes", "confidence": 1.5, "hand_detected": true}"#;
        let InboundMessage::Inference(result) = InboundMessage::parse(raw).unwrap() else {
            panic!("expected inference result");
        };
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn parses_acknowledgement() {
        let raw = br#"{"status": "success", "samples": 42}"#;
        assert_eq!(
            InboundMessage::parse(raw).unwrap(),
            InboundMessage::Acknowledgement(Acknowledgement { samples: 42 })
        );
    }

    #[test]
    fn negative_sample_count_is_a_protocol_error() {
        let err = InboundMessage::parse(br#"{"samples": -3}"#).unwrap_err();
        assert!(matches!(err, StreamError::Protocol { .. }));
    }

    #[test]
    fn parses_server_error() {
        let raw = br#"{"error": "Failed to decode image", "timestamp": 3.5}"#;
        assert_eq!(
            InboundMessage::parse(raw).unwrap(),
            InboundMessage::ServerError { message: "Failed to decode image".to_string() }
        );
    }

    #[test]
    fn malformed_payloads_are_protocol_errors() {
        for raw in [&b"not json"[..], b"[1, 2, 3]", b"{\"status\": \"ok\"}", b"{\"gesture\": 7}"] {
            let err = InboundMessage::parse(raw).unwrap_err();
            assert!(matches!(err, StreamError::Protocol { .. }), "payload {:?}", raw);
        }
    }
}
