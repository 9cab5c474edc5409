//! Conversation controller: start/stop, one live session at a time.
//!
//! [`Conversation`] is what an application holds.  It outlives individual
//! connections and keeps the consumer-facing handles stable (the boundary
//! publisher, the message FIFO and the status channel), while every
//! per-connection structure is built fresh on each [`start`](Conversation::start).
//!
//! # Start sequence
//!
//! ```text
//! stop previous session
//!   └─▶ status = Connecting
//!   └─▶ open output sink                      (no device → Unsupported)
//!   └─▶ resolve address                       (DiscoveryError)
//!   └─▶ connect with bounded retry            (ConnectionError)
//!   └─▶ wait until open (100 ms poll)
//!   └─▶ status = Connected
//!   └─▶ open microphone                       (Permission / Capture)
//!   └─▶ send audio_metadata
//!   └─▶ start capture, spawn Session::run
//! ```

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::boundary::{detector_for, BoundaryEdge, BoundaryView, TimelinePublisher};
use crate::capture::{CaptureDevice, CaptureError, CaptureSession, MicCapture};
use crate::config::{AppConfig, AudioConfig};
use crate::inbound::MessageQueue;
use crate::playback::{AudioSink, ClipDoneCallback, PlaybackEngine, SinkError, SpeakerSink};
use crate::transport::{
    resolver_for, ConnectionError, DiscoveryError, OutboundMessage, RetryPolicy,
    SignalingClient, SocketCallback, Uplink,
};

use super::runner::{Session, SessionEvent};
use super::state::{status_channel, ConnectionState, SessionStatus, StatusReceiver, StatusSender};

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Why a connection attempt was aborted.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No usable audio output; rejected before any network activity.
    #[error("audio output is not available in this environment: {0}")]
    Unsupported(SinkError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The user or OS denied microphone access.
    #[error("microphone access denied: {0}. Allow microphone access and start again")]
    Permission(String),

    #[error("microphone capture failed: {0}")]
    Capture(CaptureError),
}

impl From<CaptureError> for SessionError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::PermissionDenied(message) => SessionError::Permission(message),
            other => SessionError::Capture(other),
        }
    }
}

impl SessionError {
    /// `true` when the handshake retry budget is spent, as opposed to a
    /// failure that happened before or after connecting.
    pub fn is_terminal_connection_failure(&self) -> bool {
        matches!(
            self,
            SessionError::Connection(ConnectionError::RetriesExhausted { .. })
        )
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// Opens the audio hardware for a new session.
pub trait Devices: Send + Sync {
    fn open_sink(
        &self,
        config: &AudioConfig,
        on_done: ClipDoneCallback,
    ) -> Result<Box<dyn AudioSink>, SinkError>;

    fn open_capture(&self, config: &AudioConfig) -> Result<Box<dyn CaptureDevice>, CaptureError>;
}

/// The default host's speaker and microphone, via cpal.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDevices;

impl Devices for SystemDevices {
    fn open_sink(
        &self,
        config: &AudioConfig,
        on_done: ClipDoneCallback,
    ) -> Result<Box<dyn AudioSink>, SinkError> {
        Ok(Box::new(SpeakerSink::open(config, on_done)?))
    }

    fn open_capture(&self, config: &AudioConfig) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        Ok(Box::new(MicCapture::open(config)?))
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

struct LiveSession {
    events: mpsc::UnboundedSender<SessionEvent>,
    task: JoinHandle<()>,
}

pub struct Conversation {
    config: AppConfig,
    devices: Arc<dyn Devices>,
    publisher: TimelinePublisher,
    messages: MessageQueue,
    status: Arc<StatusSender>,
    status_rx: StatusReceiver,
    live: Option<LiveSession>,
    mic_active: bool,
}

impl Conversation {
    pub fn new(config: AppConfig, devices: Arc<dyn Devices>) -> Self {
        let (status, status_rx) = status_channel();
        let mic_active = config.capture.start_active;
        Self {
            config,
            devices,
            publisher: TimelinePublisher::new(),
            messages: MessageQueue::new(),
            status: Arc::new(status),
            status_rx,
            live: None,
            mic_active,
        }
    }

    /// A conversation on the system audio devices.
    pub fn with_system_devices(config: AppConfig) -> Self {
        Self::new(config, Arc::new(SystemDevices))
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Connect to `target` (a discovery URL or socket address; `None` uses
    /// the configured endpoints) and start streaming.
    ///
    /// Any live session is stopped first.  On failure the status becomes
    /// `Error` with the error's message.
    pub async fn start(&mut self, target: Option<&str>) -> Result<(), SessionError> {
        self.stop().await;
        self.set_status(SessionStatus::new(ConnectionState::Connecting));

        match self.open_session(target).await {
            Ok(live) => {
                self.live = Some(live);
                Ok(())
            }
            Err(e) => {
                log::error!("session: start failed: {e}");
                self.set_status(SessionStatus::error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn open_session(&self, target: Option<&str>) -> Result<LiveSession, SessionError> {
        let connection = &self.config.connection;
        let (tx, rx) = mpsc::unbounded_channel();

        let done_tx = tx.clone();
        let on_done: ClipDoneCallback = Arc::new(move |seq| {
            let _ = done_tx.send(SessionEvent::ClipFinished(seq));
        });
        let sink = self
            .devices
            .open_sink(&self.config.audio, on_done)
            .map_err(SessionError::Unsupported)?;

        let address = resolver_for(target, connection).resolve().await?;

        let socket_tx = tx.clone();
        let on_event: SocketCallback = Arc::new(move |event| {
            let _ = socket_tx.send(SessionEvent::Socket(event));
        });
        let policy = RetryPolicy::new(connection.max_attempts, connection.backoff_base());
        let client = SignalingClient::connect(&address, policy, on_event).await?;
        client
            .wait_until_open(connection.ready_poll(), connection.ready_timeout())
            .await?;
        self.set_status(SessionStatus::new(ConnectionState::Connected));

        let capture = match self.start_capture(&client, sink.sample_rate(), tx.clone()) {
            Ok(capture) => capture,
            Err(e) => {
                client.close();
                return Err(e);
            }
        };

        let session = Session::new(
            Arc::new(client),
            PlaybackEngine::new(sink, self.config.audio.fallback_pcm_sample_rate),
            detector_for(&self.config.boundary),
            self.publisher.clone(),
            capture,
            self.messages.clone(),
            Arc::clone(&self.status),
        );
        let task = tokio::spawn(session.run(rx));

        Ok(LiveSession { events: tx, task })
    }

    fn start_capture(
        &self,
        client: &SignalingClient,
        output_sample_rate: u32,
        tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<CaptureSession, SessionError> {
        let device = self.devices.open_capture(&self.config.audio)?;
        let mut capture =
            CaptureSession::new(device, self.publisher.view(), &self.config.audio, self.mic_active);

        client.send(&OutboundMessage::AudioMetadata {
            sample_rate: capture.upload_rate(),
            output_sample_rate,
        })?;

        capture.start(Box::new(move |audio| {
            let _ = tx.send(SessionEvent::Captured(audio));
        }))?;
        Ok(capture)
    }

    /// Tear down the live session, if any, and wait for it to finish.
    pub async fn stop(&mut self) {
        let Some(live) = self.live.take() else {
            return;
        };
        let _ = live.events.send(SessionEvent::Stop);
        if let Err(e) = live.task.await {
            log::error!("session: task failed: {e}");
            self.set_status(SessionStatus::new(ConnectionState::Idle));
        }
    }

    // -----------------------------------------------------------------------
    // Controls
    // -----------------------------------------------------------------------

    /// Send a typed message.  Empty text is ignored; returns whether the
    /// message was handed to a live session.
    pub fn send_text(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        match &self.live {
            Some(live) => live
                .events
                .send(SessionEvent::SendText(text.to_string()))
                .is_ok(),
            None => {
                log::warn!("session: not connected, dropping text message");
                false
            }
        }
    }

    /// User microphone toggle.  Persists across reconnects.
    pub fn set_mic_active(&mut self, active: bool) {
        self.mic_active = active;
        if let Some(live) = &self.live {
            let _ = live.events.send(SessionEvent::SetMicActive(active));
        }
    }

    pub fn mic_active(&self) -> bool {
        self.mic_active
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    /// Current `{active, activeSince}` and its changes.
    pub fn boundary(&self) -> BoundaryView {
        self.publisher.view()
    }

    /// Start/stop edges, one pair per utterance.
    pub fn subscribe_edges(&self) -> broadcast::Receiver<BoundaryEdge> {
        self.publisher.subscribe_edges()
    }

    /// The inbound application message FIFO.
    pub fn messages(&self) -> MessageQueue {
        self.messages.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn watch_status(&self) -> StatusReceiver {
        self.status.subscribe()
    }

    /// `true` while a session task is running.
    pub fn is_live(&self) -> bool {
        self.live
            .as_ref()
            .is_some_and(|live| !live.task.is_finished())
    }

    fn set_status(&self, status: SessionStatus) {
        log::debug!("session: status → {}", status.state.label());
        self.status.send_replace(status);
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            let _ = live.events.send(SessionEvent::Stop);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
