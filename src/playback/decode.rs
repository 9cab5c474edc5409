//! Decoding of inbound chunk bytes into playable samples.
//!
//! Two container formats are accepted:
//!
//! * a complete RIFF/WAVE file (any integer depth up to 32 bits, or 32-bit
//!   float), read with `hound`;
//! * headerless little-endian PCM16 mono, assumed to be at the configured
//!   fallback rate.

use std::io::Cursor;

use hound::{SampleFormat, WavReader};
use thiserror::Error;

use crate::audio::from_pcm16_le;

/// Interleaved `f32` samples and their format.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        match self.channels {
            0 => 0,
            n => self.samples.len() / n as usize,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("chunk is empty")]
    Empty,

    #[error("invalid WAV data: {0}")]
    Wav(#[from] hound::Error),

    #[error("unsupported WAV format: {bits}-bit {format:?}")]
    UnsupportedFormat { bits: u16, format: SampleFormat },

    #[error("raw PCM16 chunk has odd length {0}")]
    OddLength(usize),
}

/// Decode one chunk.
///
/// # Errors
///
/// [`DecodeError::Empty`] for zero bytes, [`DecodeError::Wav`] for a broken
/// RIFF container, [`DecodeError::OddLength`] for raw PCM16 that cannot be a
/// whole number of samples.
pub fn decode_chunk(bytes: &[u8], fallback_rate: u32) -> Result<DecodedAudio, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.starts_with(b"RIFF") {
        return decode_wav(bytes);
    }
    let samples = from_pcm16_le(bytes).ok_or(DecodeError::OddLength(bytes.len()))?;
    Ok(DecodedAudio {
        samples,
        sample_rate: fallback_rate,
        channels: 1,
    })
}

fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, DecodeError> {
    let reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Int, bits @ 1..=32) => {
            let scale = (1_i64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
        (format, bits) => return Err(DecodeError::UnsupportedFormat { bits, format }),
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}
