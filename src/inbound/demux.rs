//! Inbound frame classification.
//!
//! Each text frame becomes exactly one [`Inbound`] value (or a
//! [`ParseError`]).  Frames are classified in arrival order; the caller
//! appends the results to the playback queue and message list in that same
//! order, so an `audio_end` always lands behind the chunks that preceded it.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use thiserror::Error;

use crate::transport::RawFrame;

// ---------------------------------------------------------------------------
// ParseError
// ---------------------------------------------------------------------------

/// A single inbound frame could not be understood.  Always recovered: the
/// frame is logged and dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("frame is not valid JSON: {0}")]
    Json(String),

    #[error("`{0}` frame has no usable data field")]
    MissingData(&'static str),

    #[error("audio payload is not valid base64: {0}")]
    Base64(String),

    #[error("message payload is not valid JSON: {0}")]
    NestedJson(String),
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// The classified form of an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Decoded (but not yet audio-decoded) chunk bytes, plus the sender's
    /// timestamp in ms when the frame carried one.
    Audio {
        bytes: Vec<u8>,
        timestamp_ms: Option<f64>,
    },
    /// End of the current utterance.
    AudioEnd,
    /// Application payload (text, visemes, animation cues…).
    Message(Value),
    /// A well-formed frame of a kind this client does not handle.
    Unknown(String),
}

/// Classify one raw text frame.
///
/// ```rust
/// use realtime_voice::inbound::{classify, Inbound};
///
/// let frame = r#"{"type":"audio","data":"AAA="}"#;
/// assert!(matches!(classify(frame), Ok(Inbound::Audio { .. })));
/// assert_eq!(classify(r#"{"type":"audio_end"}"#), Ok(Inbound::AudioEnd));
/// ```
pub fn classify(frame: &str) -> Result<Inbound, ParseError> {
    let raw: RawFrame = serde_json::from_str(frame).map_err(|e| ParseError::Json(e.to_string()))?;

    match raw.kind.as_str() {
        "audio" => {
            let encoded = raw
                .data
                .as_ref()
                .and_then(Value::as_str)
                .ok_or(ParseError::MissingData("audio"))?;
            let bytes = STANDARD
                .decode(encoded.trim())
                .map_err(|e| ParseError::Base64(e.to_string()))?;
            Ok(Inbound::Audio {
                bytes,
                timestamp_ms: raw.timestamp,
            })
        }
        "audio_end" => Ok(Inbound::AudioEnd),
        "message" => {
            let payload = match raw.data {
                Some(Value::String(text)) => serde_json::from_str(&text)
                    .map_err(|e| ParseError::NestedJson(e.to_string()))?,
                // Some backends skip the inner stringify.
                Some(Value::Object(map)) => Value::Object(map),
                _ => return Err(ParseError::MissingData("message")),
            };
            Ok(Inbound::Message(payload))
        }
        other => Ok(Inbound::Unknown(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
