//! Microphone capture via `cpal`.
//!
//! [`MicCapture`] wraps the cpal host/device/stream lifecycle behind the
//! [`CaptureDevice`] trait.  [`CaptureDevice::start`] begins delivering
//! [`CapturedAudio`] buffers to a callback; [`CaptureDevice::stop`] tears the
//! stream down and guarantees no further callbacks.

use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use crate::config::AudioConfig;

// ---------------------------------------------------------------------------
// CapturedAudio
// ---------------------------------------------------------------------------

/// A single buffer of raw audio as delivered by the cpal callback.
///
/// Samples are interleaved `f32` in the range `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedAudio {
    /// Interleaved PCM samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate of this buffer in Hz (e.g. 44100, 48000).
    pub sample_rate: u32,
    /// Number of interleaved channels (1 = mono, 2 = stereo, …).
    pub channels: u16,
}

/// Receives captured buffers.  Runs on the audio thread; must not block.
pub type CaptureCallback = Box<dyn Fn(CapturedAudio) + Send + 'static>;

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while setting up or running the audio capture.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    /// The OS refused microphone access.
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(String),

    #[error("failed to build input stream: {0}")]
    BuildStream(String),

    #[error("failed to start audio stream: {0}")]
    PlayStream(String),

    #[error("capture is already running")]
    AlreadyRunning,
}

/// Host backends report a denied microphone as a backend-specific error;
/// recognise it by its description.
fn looks_like_permission_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["permission", "denied", "not allowed", "not authorized"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn classify_build_error(err: cpal::BuildStreamError) -> CaptureError {
    let text = err.to_string();
    match err {
        cpal::BuildStreamError::BackendSpecific { .. } if looks_like_permission_error(&text) => {
            CaptureError::PermissionDenied(text)
        }
        _ => CaptureError::BuildStream(text),
    }
}

fn classify_play_error(err: cpal::PlayStreamError) -> CaptureError {
    let text = err.to_string();
    if looks_like_permission_error(&text) {
        CaptureError::PermissionDenied(text)
    } else {
        CaptureError::PlayStream(text)
    }
}

// ---------------------------------------------------------------------------
// CaptureDevice trait
// ---------------------------------------------------------------------------

/// A microphone.  Implemented by [`MicCapture`] and by test doubles.
pub trait CaptureDevice: Send {
    /// Native sample rate in Hz.
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Begin delivering buffers to `on_data`.
    fn start(&mut self, on_data: CaptureCallback) -> Result<(), CaptureError>;

    /// Stop delivery.  Idempotent; no callback runs after this returns.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

// ---------------------------------------------------------------------------
// MicCapture
// ---------------------------------------------------------------------------

struct RunningStream {
    stop_tx: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Microphone capture device wrapper built on top of `cpal`.
///
/// The cpal stream lives on a dedicated thread because `cpal::Stream` is not
/// `Send` on every host.  That thread reopens the default input device, so
/// only the negotiated format is kept here.
pub struct MicCapture {
    config: cpal::StreamConfig,
    sample_rate: u32,
    channels: u16,
    running: Option<RunningStream>,
}

impl MicCapture {
    /// Open the system default input device.
    ///
    /// `config.echo_cancellation` is logged but cannot be enforced: cpal has
    /// no processing controls, so it depends on the host audio stack.
    ///
    /// # Errors
    ///
    /// [`CaptureError::NoDevice`] when no input device is available,
    /// [`CaptureError::PermissionDenied`] when the OS refuses access while
    /// querying the device.
    pub fn open(config: &AudioConfig) -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;

        let supported = device.default_input_config().map_err(|e| {
            let text = e.to_string();
            if looks_like_permission_error(&text) {
                CaptureError::PermissionDenied(text)
            } else {
                CaptureError::DefaultConfig(text)
            }
        })?;

        let channels = supported.channels();
        let sample_rate = supported.sample_rate().0;
        let stream_config: cpal::StreamConfig = supported.into();

        log::info!(
            "capture: input device at {sample_rate} Hz, {channels} ch (echo cancellation requested: {})",
            config.echo_cancellation
        );

        Ok(Self {
            config: stream_config,
            sample_rate,
            channels,
            running: None,
        })
    }
}

impl CaptureDevice for MicCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn start(&mut self, on_data: CaptureCallback) -> Result<(), CaptureError> {
        if self.running.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }

        let config = self.config.clone();
        let sample_rate = self.sample_rate;
        let channels = self.channels;
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("capture-input".into())
            .spawn(move || {
                let Some(device) = cpal::default_host().default_input_device() else {
                    let _ = ready_tx.send(Err(CaptureError::NoDevice));
                    return;
                };
                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        on_data(CapturedAudio {
                            samples: data.to_vec(),
                            sample_rate,
                            channels,
                        });
                    },
                    |err: cpal::StreamError| {
                        log::error!("capture: cpal stream error: {err}");
                    },
                    None,
                );
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(classify_build_error(e)));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(classify_play_error(e)));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                let _ = stop_rx.recv();
                drop(stream);
                log::debug!("capture: input thread stopped");
            })
            .map_err(|e| CaptureError::BuildStream(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.running = Some(RunningStream { stop_tx, thread });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(CaptureError::BuildStream("capture thread exited".into())),
        }
    }

    fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop_tx.send(());
            let _ = running.thread.join();
        }
    }

    fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
