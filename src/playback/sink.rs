//! Audio output sinks.
//!
//! The [`AudioSink`] trait is the seam between the playback engine and the
//! output hardware.  [`SpeakerSink`] implements it on top of a `cpal` output
//! stream; tests substitute a recording double.
//!
//! # Threading
//!
//! `cpal::Stream` is `!Send` on several hosts, so the stream is built and
//! owned by a dedicated thread.  The sink itself only holds the shared
//! [`PlayoutBuffer`] that the output callback pulls from, which keeps
//! `SpeakerSink` movable into the async session task.

use std::collections::VecDeque;
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use super::decode::DecodedAudio;
use crate::audio::convert;
use crate::config::AudioConfig;

/// Invoked with the clip id once its last sample has been handed to the
/// device.  Runs on the audio thread; must not block.
pub type ClipDoneCallback = Arc<dyn Fn(u64) + Send + Sync>;

// ---------------------------------------------------------------------------
// SinkError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum SinkError {
    #[error("no audio output device is available")]
    NoDevice,

    #[error("failed to query output config: {0}")]
    Config(String),

    #[error("failed to build output stream: {0}")]
    BuildStream(String),

    #[error("failed to start output stream: {0}")]
    PlayStream(String),

    #[error("output thread exited unexpectedly")]
    ThreadExited,
}

// ---------------------------------------------------------------------------
// AudioSink trait
// ---------------------------------------------------------------------------

/// Destination for decoded clips.
///
/// Clips are played in submission order.  Implementations report each clip's
/// completion through the [`ClipDoneCallback`] they were created with.
pub trait AudioSink: Send {
    /// Device sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Device channel count.
    fn channels(&self) -> u16;

    /// Start playing `clip` once everything submitted before it has played.
    fn submit(&mut self, clip_id: u64, clip: DecodedAudio) -> Result<(), SinkError>;

    /// Discard all pending audio without reporting completion.
    fn clear(&mut self);
}

// ---------------------------------------------------------------------------
// PlayoutBuffer
// ---------------------------------------------------------------------------

/// Samples waiting for the output callback, grouped by clip so completion can
/// be reported per clip.
#[derive(Default)]
struct PlayoutBuffer {
    clips: VecDeque<(u64, VecDeque<f32>)>,
}

impl PlayoutBuffer {
    /// Fill `out` from the pending clips, padding with silence.  Returns the
    /// ids of clips that were fully consumed.
    fn fill(&mut self, out: &mut [f32]) -> Vec<u64> {
        let mut finished = Vec::new();
        let mut written = 0;

        while written < out.len() {
            let Some((id, samples)) = self.clips.front_mut() else {
                break;
            };
            while written < out.len() {
                match samples.pop_front() {
                    Some(s) => {
                        out[written] = s;
                        written += 1;
                    }
                    None => break,
                }
            }
            if samples.is_empty() {
                finished.push(*id);
                self.clips.pop_front();
            }
        }

        out[written..].fill(0.0);
        finished
    }
}

fn lock(buffer: &Mutex<PlayoutBuffer>) -> MutexGuard<'_, PlayoutBuffer> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// SpeakerSink
// ---------------------------------------------------------------------------

/// Plays clips on the default output device.
pub struct SpeakerSink {
    buffer: Arc<Mutex<PlayoutBuffer>>,
    on_done: ClipDoneCallback,
    sample_rate: u32,
    channels: u16,
    stop_tx: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SpeakerSink {
    /// Open the default output device and start an (initially silent) stream.
    ///
    /// `config.output_sample_rate` is honoured when the device supports it at
    /// its default channel count; otherwise the device default is used.
    ///
    /// # Errors
    ///
    /// [`SinkError::NoDevice`] when the host has no output device; the other
    /// variants when cpal rejects the stream.
    pub fn open(config: &AudioConfig, on_done: ClipDoneCallback) -> Result<Self, SinkError> {
        let buffer = Arc::new(Mutex::new(PlayoutBuffer::default()));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(u32, u16), SinkError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let requested_rate = config.output_sample_rate;
        let thread_buffer = Arc::clone(&buffer);
        let thread_done = Arc::clone(&on_done);

        let thread = std::thread::Builder::new()
            .name("playback-output".into())
            .spawn(move || {
                let stream = match build_output_stream(requested_rate, thread_buffer, thread_done) {
                    Ok((stream, rate, channels)) => {
                        let _ = ready_tx.send(Ok((rate, channels)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Park until the sink is dropped.
                let _ = stop_rx.recv();
                drop(stream);
                log::debug!("playback: output thread stopped");
            })
            .map_err(|e| SinkError::BuildStream(e.to_string()))?;

        let (sample_rate, channels) = match ready_rx.recv() {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => return Err(SinkError::ThreadExited),
        };

        log::info!("playback: output stream open at {sample_rate} Hz, {channels} ch");

        Ok(Self {
            buffer,
            on_done,
            sample_rate,
            channels,
            stop_tx,
            thread: Some(thread),
        })
    }
}

fn build_output_stream(
    requested_rate: Option<u32>,
    buffer: Arc<Mutex<PlayoutBuffer>>,
    on_done: ClipDoneCallback,
) -> Result<(cpal::Stream, u32, u16), SinkError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(SinkError::NoDevice)?;

    let default = device
        .default_output_config()
        .map_err(|e| SinkError::Config(e.to_string()))?;
    let channels = default.channels();

    let supported = requested_rate
        .and_then(|rate| {
            device.supported_output_configs().ok()?.find(|range| {
                range.channels() == channels
                    && range.min_sample_rate().0 <= rate
                    && rate <= range.max_sample_rate().0
            })
            .map(|range| range.with_sample_rate(cpal::SampleRate(rate)))
        })
        .unwrap_or(default);

    let sample_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.into();

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let finished = lock(&buffer).fill(data);
                for id in finished {
                    on_done(id);
                }
            },
            |err: cpal::StreamError| {
                log::error!("playback: cpal stream error: {err}");
            },
            None,
        )
        .map_err(|e| SinkError::BuildStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| SinkError::PlayStream(e.to_string()))?;

    Ok((stream, sample_rate, channels))
}

impl AudioSink for SpeakerSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn submit(&mut self, clip_id: u64, clip: DecodedAudio) -> Result<(), SinkError> {
        let samples = convert(
            &clip.samples,
            clip.sample_rate,
            clip.channels,
            self.sample_rate,
            self.channels,
        );
        if samples.is_empty() {
            (self.on_done)(clip_id);
            return Ok(());
        }
        lock(&self.buffer)
            .clips
            .push_back((clip_id, samples.into()));
        Ok(())
    }

    fn clear(&mut self) {
        lock(&self.buffer).clips.clear();
    }
}

impl Drop for SpeakerSink {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
