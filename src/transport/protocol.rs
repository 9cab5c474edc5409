//! JSON text frames exchanged with the backend.
//!
//! Outbound frames are strongly typed ([`OutboundMessage`]).  Inbound frames
//! are parsed leniently into [`RawFrame`] and classified by
//! [`crate::inbound::classify`], so one malformed field never aborts the
//! socket.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// OutboundMessage
// ---------------------------------------------------------------------------

/// Every frame this client sends.
///
/// | Variant         | Wire form                                                         |
/// |-----------------|-------------------------------------------------------------------|
/// | `AudioMetadata` | `{"type":"audio_metadata","sampleRate":16000,"outputSampleRate":48000}` |
/// | `Audio`         | `{"type":"audio","data":"<base64 PCM16>"}`                        |
/// | `Message`       | `{"type":"message","data":"<text>"}`                              |
/// | `WebsocketStop` | `{"type":"websocket_stop"}`                                       |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Audio format negotiation, sent once after the socket is open.
    AudioMetadata {
        /// Rate of the PCM this client uploads.
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        /// Rate of the local output device.
        #[serde(rename = "outputSampleRate")]
        output_sample_rate: u32,
    },
    /// One captured microphone buffer.
    Audio { data: String },
    /// A typed user message.
    Message { data: String },
    /// Best-effort notice that the client is hanging up.
    WebsocketStop,
}

impl OutboundMessage {
    /// Serialise to the JSON text carried by a websocket text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::AudioMetadata { .. } => "audio_metadata",
            OutboundMessage::Audio { .. } => "audio",
            OutboundMessage::Message { .. } => "message",
            OutboundMessage::WebsocketStop => "websocket_stop",
        }
    }
}

// ---------------------------------------------------------------------------
// RawFrame
// ---------------------------------------------------------------------------

/// Untyped view of an inbound frame.
///
/// Inbound kinds: `audio` (`data` = base64 audio, optional `timestamp` in
/// ms), `audio_end`, and `message` (`data` = JSON-encoded string).
#[derive(Debug, Clone, Deserialize)]
pub struct RawFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<f64>,
}
