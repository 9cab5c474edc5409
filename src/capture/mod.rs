//! Microphone capture and the half-duplex uplink.
//!
//! ```text
//! MicCapture (cpal thread) ──CapturedAudio──▶ session actor
//!                                                 │
//!                        CaptureSession::on_data_available
//!                          user toggle? playback idle? socket open?
//!                                                 │
//!                         mono → resample → PCM16 → base64 → {type:"audio"}
//! ```

pub mod device;
pub mod uplink;

pub use device::{CaptureCallback, CaptureDevice, CaptureError, CapturedAudio, MicCapture};
pub use uplink::{CaptureSession, UplinkOutcome};
