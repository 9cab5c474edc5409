//! Test doubles for the device and socket seams (test-only).
//!
//! Every double appends to a shared [`EventLog`] so tests can assert on the
//! relative order of effects across components.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::capture::{CaptureCallback, CaptureDevice, CaptureError};
use crate::config::AudioConfig;
use crate::playback::{AudioSink, ClipDoneCallback, DecodedAudio, SinkError};
use crate::transport::{ConnectionError, OutboundMessage, Uplink};

use super::conversation::Devices;

pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Poll `condition` every 5 ms for up to 2 s.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

/// Logs `play:<first sample as i16>`; completion is left to the test.
pub struct MockSink {
    pub log: EventLog,
}

impl AudioSink for MockSink {
    fn sample_rate(&self) -> u32 {
        24_000
    }
    fn channels(&self) -> u16 {
        1
    }
    fn submit(&mut self, clip_id: u64, clip: DecodedAudio) -> Result<(), SinkError> {
        let tag = clip
            .samples
            .first()
            .map(|s| (s * 32_768.0).round() as i32)
            .unwrap_or_default();
        self.log
            .lock()
            .unwrap()
            .push(format!("play:{clip_id}:{tag}"));
        Ok(())
    }
    fn clear(&mut self) {
        self.log.lock().unwrap().push("sink.clear".into());
    }
}

// ---------------------------------------------------------------------------
// MockCapture
// ---------------------------------------------------------------------------

pub struct MockCapture {
    pub log: EventLog,
    /// Number of capture devices currently started, across all sessions.
    pub live: Arc<AtomicUsize>,
    running: bool,
}

impl MockCapture {
    pub fn new(log: EventLog, live: Arc<AtomicUsize>) -> Self {
        Self {
            log,
            live,
            running: false,
        }
    }
}

impl CaptureDevice for MockCapture {
    fn sample_rate(&self) -> u32 {
        16_000
    }
    fn channels(&self) -> u16 {
        1
    }
    fn start(&mut self, _on_data: CaptureCallback) -> Result<(), CaptureError> {
        self.running = true;
        self.live.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push("capture.start".into());
        Ok(())
    }
    fn stop(&mut self) {
        if self.running {
            self.running = false;
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.log.lock().unwrap().push("capture.stop".into());
        }
    }
    fn is_running(&self) -> bool {
        self.running
    }
}

// ---------------------------------------------------------------------------
// RecordingUplink
// ---------------------------------------------------------------------------

pub struct RecordingUplink {
    pub log: EventLog,
    open: AtomicBool,
}

impl RecordingUplink {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            open: AtomicBool::new(true),
        }
    }

    /// Number of frames of `kind` sent so far.
    pub fn sent(&self, kind: &str) -> usize {
        let needle = format!("send:{kind}");
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == needle)
            .count()
    }
}

impl Uplink for RecordingUplink {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
    fn send(&self, message: &OutboundMessage) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::NotOpen);
        }
        self.log
            .lock()
            .unwrap()
            .push(format!("send:{}", message.kind()));
        Ok(())
    }
    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.log.lock().unwrap().push("socket.close".into());
        }
    }
}

// ---------------------------------------------------------------------------
// MockDevices
// ---------------------------------------------------------------------------

/// [`Devices`] handing out [`MockSink`]s and [`MockCapture`]s.
#[derive(Clone)]
pub struct MockDevices {
    pub log: EventLog,
    pub live_captures: Arc<AtomicUsize>,
    pub sink_error: Option<SinkError>,
    pub capture_error: Option<CaptureError>,
}

impl MockDevices {
    pub fn new() -> Self {
        Self {
            log: event_log(),
            live_captures: Arc::new(AtomicUsize::new(0)),
            sink_error: None,
            capture_error: None,
        }
    }
}

impl Devices for MockDevices {
    fn open_sink(
        &self,
        _config: &AudioConfig,
        _on_done: ClipDoneCallback,
    ) -> Result<Box<dyn AudioSink>, SinkError> {
        if let Some(e) = &self.sink_error {
            return Err(e.clone());
        }
        Ok(Box::new(MockSink {
            log: Arc::clone(&self.log),
        }))
    }

    fn open_capture(&self, _config: &AudioConfig) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        if let Some(e) = &self.capture_error {
            return Err(e.clone());
        }
        Ok(Box::new(MockCapture::new(
            Arc::clone(&self.log),
            Arc::clone(&self.live_captures),
        )))
    }
}
