//! PCM sample conversion and the base64 framing used on the socket.
//!
//! Uplink audio travels as little-endian signed 16-bit mono PCM ("linear16"),
//! base64-encoded into the `data` field of an `audio` frame.

use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Convert a normalised `f32` sample to `i16`, clamping out-of-range input.
pub fn f32_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32).round() as i16
}

/// Convert an `i16` sample to `f32` in `[-1.0, 1.0)`.
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32_768.0
}

/// Serialise samples as little-endian PCM16 bytes.
pub fn to_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&f32_to_i16(s).to_le_bytes());
    }
    out
}

/// Parse little-endian PCM16 bytes.  Returns `None` for odd-length input.
pub fn from_pcm16_le(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(2)
            .map(|pair| i16_to_f32(i16::from_le_bytes([pair[0], pair[1]])))
            .collect(),
    )
}

/// Encode samples as base64 PCM16, ready for an `audio` frame.
pub fn encode_pcm16_base64(samples: &[f32]) -> String {
    STANDARD.encode(to_pcm16_le(samples))
}
