//! Half-duplex microphone uplink.
//!
//! [`CaptureSession`] owns the microphone for one connection and decides,
//! buffer by buffer, whether captured audio goes to the socket.

use crate::audio::{encode_pcm16_base64, resample_linear, stereo_to_mono};
use crate::boundary::BoundaryView;
use crate::config::AudioConfig;
use crate::transport::{OutboundMessage, Uplink};

use super::device::{CaptureCallback, CaptureDevice, CaptureError, CapturedAudio};

/// What happened to one captured buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkOutcome {
    Sent,
    /// The agent is speaking.
    SuppressedByPlayback,
    /// The user muted the microphone.
    SuppressedByUser,
    /// Dropped, not buffered.
    SocketNotOpen,
    Empty,
    SendFailed,
}

pub struct CaptureSession {
    device: Box<dyn CaptureDevice>,
    playback: BoundaryView,
    user_active: bool,
    upload_rate: u32,
}

impl CaptureSession {
    /// `playback` is the boundary level that gates the uplink.  Audio is sent
    /// at `config.input_sample_rate`, or the device rate when unset.
    pub fn new(
        device: Box<dyn CaptureDevice>,
        playback: BoundaryView,
        config: &AudioConfig,
        user_active: bool,
    ) -> Self {
        let upload_rate = config
            .input_sample_rate
            .filter(|rate| *rate > 0)
            .unwrap_or_else(|| device.sample_rate());
        Self {
            device,
            playback,
            user_active,
            upload_rate,
        }
    }

    /// The `sampleRate` advertised in `audio_metadata`.
    pub fn upload_rate(&self) -> u32 {
        self.upload_rate
    }

    pub fn start(&mut self, on_data: CaptureCallback) -> Result<(), CaptureError> {
        self.device.start(on_data)?;
        log::info!(
            "capture: started, uploading mono PCM16 at {} Hz",
            self.upload_rate
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.device.is_running() {
            self.device.stop();
            log::info!("capture: stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.device.is_running()
    }

    pub fn set_user_active(&mut self, active: bool) {
        self.user_active = active;
    }

    pub fn user_active(&self) -> bool {
        self.user_active
    }

    /// Gate, encode, and send one captured buffer.
    pub fn on_data_available(&self, audio: &CapturedAudio, uplink: &dyn Uplink) -> UplinkOutcome {
        if !self.user_active {
            return UplinkOutcome::SuppressedByUser;
        }
        if self.playback.active() {
            return UplinkOutcome::SuppressedByPlayback;
        }
        if !uplink.is_open() {
            return UplinkOutcome::SocketNotOpen;
        }

        let mono = stereo_to_mono(&audio.samples, audio.channels);
        let samples = resample_linear(&mono, audio.sample_rate, self.upload_rate);
        if samples.is_empty() {
            return UplinkOutcome::Empty;
        }

        let message = OutboundMessage::Audio {
            data: encode_pcm16_base64(&samples),
        };
        match uplink.send(&message) {
            Ok(()) => UplinkOutcome::Sent,
            Err(e) => {
                log::warn!("capture: dropping buffer: {e}");
                UplinkOutcome::SendFailed
            }
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
