//! Sample-format helpers shared by the capture and playback paths.
//!
//! ```text
//! Microphone → CapturedAudio (device rate, N ch) → convert → mono → PCM16 → base64 → socket
//! socket → base64 → WAV / PCM16 → DecodedAudio → convert → output device
//! ```

pub mod pcm;
pub mod resample;

pub use pcm::{encode_pcm16_base64, f32_to_i16, from_pcm16_le, i16_to_f32, to_pcm16_le};
pub use resample::{convert, mono_to_channels, resample_linear, stereo_to_mono};
