//! Session actor: owns every piece of per-connection state.
//!
//! A [`Session`] is built fresh for each connection and consumes
//! [`SessionEvent`]s from a single `tokio::sync::mpsc` channel.  The socket
//! reader, the cpal callbacks and the conversation controller only post
//! events, so queue appends, drain checks and boundary updates are
//! serialised without locks.
//!
//! # Event flow
//!
//! ```text
//! Socket(Frame)      ──▶ classify ─┬─ Audio    → detector.on_packet → enqueue → drain
//!                                  ├─ AudioEnd → enqueue marker → drain
//!                                  └─ Message  → MessageQueue
//! ClipFinished(seq)  ──▶ drain
//! Captured(audio)    ──▶ CaptureSession::on_data_available (half-duplex gate)
//! Stop | Socket(Closed) | channel closed ──▶ teardown
//! ```
//!
//! # Teardown
//!
//! 1. stop capture
//! 2. best-effort `websocket_stop`
//! 3. close the socket
//! 4. clear the playback queue and boundary state

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;

use crate::boundary::{BoundaryDetector, BoundaryEdge, TimelinePublisher};
use crate::capture::{CaptureSession, CapturedAudio, UplinkOutcome};
use crate::inbound::{classify, Inbound, MessageQueue};
use crate::playback::{DrainStep, PlaybackEngine};
use crate::transport::{OutboundMessage, SocketEvent, Uplink};

use super::state::{ConnectionState, SessionStatus, StatusSender};

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

/// Inputs to the session actor.
#[derive(Debug)]
pub enum SessionEvent {
    /// From the socket reader task.
    Socket(SocketEvent),
    /// One microphone buffer from the capture thread.
    Captured(CapturedAudio),
    /// The sink finished playing chunk `seq`.
    ClipFinished(u64),
    /// User mic toggle.
    SetMicActive(bool),
    /// Typed user message to forward to the backend.
    SendText(String),
    /// Hang up.
    Stop,
}

/// Why the session ended.
#[derive(Debug, Clone, PartialEq)]
enum Ending {
    Requested,
    RemoteClosed { abnormal: bool, reason: Option<String> },
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Per-connection state.  Create with [`Session::new`], then spawn
/// [`run`](Self::run).
pub struct Session {
    uplink: Arc<dyn Uplink>,
    playback: PlaybackEngine,
    detector: Box<dyn BoundaryDetector>,
    publisher: TimelinePublisher,
    capture: CaptureSession,
    messages: MessageQueue,
    status: Arc<StatusSender>,
}

impl Session {
    pub fn new(
        uplink: Arc<dyn Uplink>,
        playback: PlaybackEngine,
        detector: Box<dyn BoundaryDetector>,
        publisher: TimelinePublisher,
        capture: CaptureSession,
        messages: MessageQueue,
        status: Arc<StatusSender>,
    ) -> Self {
        Self {
            uplink,
            playback,
            detector,
            publisher,
            capture,
            messages,
            status,
        }
    }

    // -----------------------------------------------------------------------
    // Main async loop
    // -----------------------------------------------------------------------

    /// Run until stopped, the socket closes, or every sender is dropped.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        let ending = loop {
            let Some(event) = events.recv().await else {
                log::debug!("session: event channel closed");
                break Ending::Requested;
            };
            match event {
                SessionEvent::Socket(SocketEvent::Frame(text)) => self.handle_frame(&text),
                SessionEvent::Socket(SocketEvent::Closed { abnormal, reason }) => {
                    break Ending::RemoteClosed { abnormal, reason };
                }
                SessionEvent::Captured(audio) => self.handle_captured(&audio),
                SessionEvent::ClipFinished(seq) => {
                    if self.playback.on_clip_finished(seq) {
                        self.drain();
                    }
                }
                SessionEvent::SetMicActive(active) => {
                    log::info!("session: microphone {}", if active { "on" } else { "off" });
                    self.capture.set_user_active(active);
                }
                SessionEvent::SendText(text) => self.send(OutboundMessage::Message { data: text }),
                SessionEvent::Stop => break Ending::Requested,
            }
        };

        // Nothing queued behind the ending event may reach the new state.
        events.close();
        self.teardown(ending);
    }

    // -----------------------------------------------------------------------
    // Event handlers
    // -----------------------------------------------------------------------

    fn handle_frame(&mut self, text: &str) {
        match classify(text) {
            Ok(Inbound::Audio {
                bytes,
                timestamp_ms,
            }) => {
                let timestamp_ms = timestamp_ms.unwrap_or_else(|| now_secs() * 1000.0);
                let edge = self.detector.on_packet(timestamp_ms);
                self.publish(edge);
                let seq = self.playback.enqueue_chunk(bytes);
                log::trace!("session: queued chunk {seq}");
                self.drain();
            }
            Ok(Inbound::AudioEnd) => {
                self.playback.enqueue_end_marker();
                self.drain();
            }
            Ok(Inbound::Message(payload)) => self.messages.push(payload),
            Ok(Inbound::Unknown(kind)) => {
                log::debug!("session: ignoring inbound `{kind}` frame");
            }
            Err(e) => log::warn!("session: dropping inbound frame: {e}"),
        }
    }

    fn handle_captured(&mut self, audio: &CapturedAudio) {
        let outcome = self.capture.on_data_available(audio, self.uplink.as_ref());
        if outcome != UplinkOutcome::Sent {
            log::trace!("session: capture buffer not sent ({outcome:?})");
        }
    }

    fn drain(&mut self) {
        for step in self.playback.drain() {
            let edge = match step {
                DrainStep::Started { .. } => self.detector.on_chunk_started(now_secs()),
                DrainStep::EndMarker => self.detector.on_end_marker(),
                DrainStep::Failed { .. } => None,
            };
            self.publish(edge);
        }
    }

    fn publish(&self, edge: Option<BoundaryEdge>) {
        if edge.is_some() {
            self.publisher.apply(self.detector.state(), edge);
        }
    }

    fn send(&self, message: OutboundMessage) {
        if let Err(e) = self.uplink.send(&message) {
            log::warn!("session: could not send {}: {e}", message.kind());
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    fn teardown(&mut self, ending: Ending) {
        log::info!("session: tearing down ({ending:?})");

        self.capture.stop();

        if self.uplink.is_open() {
            self.send(OutboundMessage::WebsocketStop);
        }
        self.uplink.close();

        self.playback.clear();
        self.detector.reset();
        self.publisher.reset();

        let status = match ending {
            Ending::RemoteClosed {
                abnormal: true,
                reason,
            } => {
                let message = reason.unwrap_or_else(|| "connection closed abnormally".into());
                log::error!("session: connection lost: {message}");
                SessionStatus::error(message)
            }
            _ => SessionStatus::new(ConnectionState::Idle),
        };
        self.status.send_replace(status);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{detector_for, ExplicitMarkerDetector, HeuristicDetector};
    use crate::config::{AudioConfig, BoundaryConfig, BoundaryPolicy};
    use crate::session::state::status_channel;
    use crate::session::testing::{
        entries, event_log, wait_for, EventLog, MockCapture, MockSink, RecordingUplink,
    };
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::broadcast;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    struct Harness {
        tx: mpsc::UnboundedSender<SessionEvent>,
        task: tokio::task::JoinHandle<()>,
        log: EventLog,
        uplink: Arc<RecordingUplink>,
        publisher: TimelinePublisher,
        edges: broadcast::Receiver<BoundaryEdge>,
        messages: MessageQueue,
        status: crate::session::StatusReceiver,
    }

    fn spawn_session(detector: Box<dyn BoundaryDetector>) -> Harness {
        let log = event_log();
        let uplink = Arc::new(RecordingUplink::new(Arc::clone(&log)));
        let publisher = TimelinePublisher::new();
        let edges = publisher.subscribe_edges();
        let messages = MessageQueue::new();
        let (status_tx, status) = status_channel();

        let playback = PlaybackEngine::new(
            Box::new(MockSink {
                log: Arc::clone(&log),
            }),
            24_000,
        );
        let mut capture = CaptureSession::new(
            Box::new(MockCapture::new(
                Arc::clone(&log),
                Arc::new(AtomicUsize::new(0)),
            )),
            publisher.view(),
            &AudioConfig::default(),
            true,
        );
        capture.start(Box::new(|_| {})).unwrap();

        let session = Session::new(
            Arc::clone(&uplink) as Arc<dyn Uplink>,
            playback,
            detector,
            publisher.clone(),
            capture,
            messages.clone(),
            Arc::new(status_tx),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(session.run(rx));

        Harness {
            tx,
            task,
            log,
            uplink,
            publisher,
            edges,
            messages,
            status,
        }
    }

    /// An `audio` frame holding one PCM16 sample equal to `tag`.
    fn audio_frame(tag: i16) -> SessionEvent {
        let data = STANDARD.encode(tag.to_le_bytes());
        SessionEvent::Socket(SocketEvent::Frame(
            json!({"type": "audio", "data": data}).to_string(),
        ))
    }

    fn audio_frame_at(tag: i16, timestamp_ms: f64) -> SessionEvent {
        let data = STANDARD.encode(tag.to_le_bytes());
        SessionEvent::Socket(SocketEvent::Frame(
            json!({"type": "audio", "data": data, "timestamp": timestamp_ms}).to_string(),
        ))
    }

    fn audio_end() -> SessionEvent {
        SessionEvent::Socket(SocketEvent::Frame(r#"{"type":"audio_end"}"#.into()))
    }

    fn mic_buffer() -> SessionEvent {
        SessionEvent::Captured(CapturedAudio {
            samples: vec![0.1; 160],
            sample_rate: 16_000,
            channels: 1,
        })
    }

    async fn next_edge(edges: &mut broadcast::Receiver<BoundaryEdge>) -> BoundaryEdge {
        tokio::time::timeout(Duration::from_secs(2), edges.recv())
            .await
            .expect("edge timed out")
            .unwrap()
    }

    fn plays(log: &EventLog) -> Vec<String> {
        entries(log)
            .into_iter()
            .filter(|e| e.starts_with("play:"))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    /// A, B, audio_end: A plays fully, then B, then the utterance closes.
    #[tokio::test]
    async fn plays_chunks_in_order_then_closes_utterance() {
        let mut h = spawn_session(Box::new(ExplicitMarkerDetector::new()));

        h.tx.send(audio_frame(100)).unwrap();
        h.tx.send(audio_frame(200)).unwrap();
        h.tx.send(audio_end()).unwrap();

        assert!(matches!(next_edge(&mut h.edges).await, BoundaryEdge::Start { .. }));
        assert!(wait_for(|| plays(&h.log).len() == 1).await);
        // B waits for A to finish.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(plays(&h.log), vec!["play:0:100"]);
        assert!(h.publisher.current().active());

        h.tx.send(SessionEvent::ClipFinished(0)).unwrap();
        assert!(wait_for(|| plays(&h.log).len() == 2).await);
        assert_eq!(plays(&h.log), vec!["play:0:100", "play:1:200"]);
        // The marker is behind B, so the utterance is still open.
        assert!(h.publisher.current().active());

        h.tx.send(SessionEvent::ClipFinished(1)).unwrap();
        assert_eq!(next_edge(&mut h.edges).await, BoundaryEdge::Stop);
        assert!(!h.publisher.current().active());
        assert!(h.publisher.current().active_since().is_none());

        h.tx.send(SessionEvent::Stop).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn back_to_back_utterances_follow_fifo() {
        let mut h = spawn_session(Box::new(ExplicitMarkerDetector::new()));

        h.tx.send(audio_frame(1)).unwrap();
        h.tx.send(audio_end()).unwrap();
        h.tx.send(audio_frame(2)).unwrap();

        assert!(matches!(next_edge(&mut h.edges).await, BoundaryEdge::Start { .. }));
        h.tx.send(SessionEvent::ClipFinished(0)).unwrap();
        assert_eq!(next_edge(&mut h.edges).await, BoundaryEdge::Stop);
        assert!(matches!(next_edge(&mut h.edges).await, BoundaryEdge::Start { .. }));
        assert_eq!(plays(&h.log), vec!["play:0:1", "play:1:2"]);

        h.tx.send(SessionEvent::Stop).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn mic_is_gated_by_playback() {
        let mut h = spawn_session(Box::new(ExplicitMarkerDetector::new()));

        h.tx.send(mic_buffer()).unwrap();
        assert!(wait_for(|| h.uplink.sent("audio") == 1).await);

        h.tx.send(audio_frame(5)).unwrap();
        assert!(matches!(next_edge(&mut h.edges).await, BoundaryEdge::Start { .. }));
        for _ in 0..3 {
            h.tx.send(mic_buffer()).unwrap();
        }
        h.tx.send(audio_end()).unwrap();
        h.tx.send(SessionEvent::ClipFinished(0)).unwrap();
        assert_eq!(next_edge(&mut h.edges).await, BoundaryEdge::Stop);
        assert_eq!(h.uplink.sent("audio"), 1);

        h.tx.send(mic_buffer()).unwrap();
        assert!(wait_for(|| h.uplink.sent("audio") == 2).await);

        h.tx.send(SessionEvent::SetMicActive(false)).unwrap();
        h.tx.send(mic_buffer()).unwrap();
        h.tx.send(SessionEvent::Stop).unwrap();
        h.task.await.unwrap();
        assert_eq!(h.uplink.sent("audio"), 2);
    }

    #[tokio::test]
    async fn teardown_runs_in_order() {
        let h = spawn_session(Box::new(ExplicitMarkerDetector::new()));
        h.tx.send(audio_frame(9)).unwrap();
        h.tx.send(audio_frame(10)).unwrap();
        h.tx.send(SessionEvent::Stop).unwrap();
        // Queued behind Stop; must never be played.
        h.tx.send(audio_frame(11)).ok();
        h.task.await.unwrap();

        let log = entries(&h.log);
        let tail: Vec<&str> = log
            .iter()
            .map(String::as_str)
            .skip_while(|e| *e != "capture.stop")
            .collect();
        assert_eq!(
            tail,
            vec!["capture.stop", "send:websocket_stop", "socket.close", "sink.clear"]
        );
        assert_eq!(plays(&h.log), vec!["play:0:9"]);
        assert!(!h.publisher.current().active());
        assert_eq!(h.status.borrow().state, ConnectionState::Idle);
    }

    #[tokio::test]
    async fn abnormal_remote_close_sets_error() {
        let h = spawn_session(Box::new(ExplicitMarkerDetector::new()));
        h.tx.send(SessionEvent::Socket(SocketEvent::Closed {
            abnormal: true,
            reason: Some("reset by peer".into()),
        }))
        .unwrap();
        h.task.await.unwrap();

        let status = h.status.borrow().clone();
        assert_eq!(status.state, ConnectionState::Error);
        assert_eq!(status.error.as_deref(), Some("reset by peer"));
        assert!(entries(&h.log).contains(&"capture.stop".to_string()));
    }

    #[tokio::test]
    async fn normal_remote_close_returns_to_idle() {
        let h = spawn_session(Box::new(ExplicitMarkerDetector::new()));
        h.tx.send(SessionEvent::Socket(SocketEvent::Closed {
            abnormal: false,
            reason: None,
        }))
        .unwrap();
        h.task.await.unwrap();
        assert_eq!(h.status.borrow().state, ConnectionState::Idle);
    }

    #[tokio::test]
    async fn messages_and_bad_frames() {
        let h = spawn_session(Box::new(ExplicitMarkerDetector::new()));
        h.tx.send(SessionEvent::Socket(SocketEvent::Frame("{oops".into())))
            .unwrap();
        h.tx.send(SessionEvent::Socket(SocketEvent::Frame(
            json!({"type": "message", "data": "{\"text\":\"hi\"}"}).to_string(),
        )))
        .unwrap();
        h.tx.send(SessionEvent::SendText("hello".into())).unwrap();
        h.tx.send(SessionEvent::Stop).unwrap();
        h.task.await.unwrap();

        assert_eq!(h.messages.snapshot(), vec![json!({"text": "hi"})]);
        assert_eq!(h.uplink.sent("message"), 1);
    }

    #[tokio::test]
    async fn heuristic_policy_uses_packet_timestamps() {
        let config = BoundaryConfig {
            policy: BoundaryPolicy::Heuristic,
            ..BoundaryConfig::default()
        };
        let mut h = spawn_session(detector_for(&config));

        h.tx.send(audio_frame_at(1, 2_000.0)).unwrap();
        assert_eq!(next_edge(&mut h.edges).await, BoundaryEdge::Start { at: 2.0 });
        for _ in 0..11 {
            h.tx.send(audio_frame_at(1, 2_000.0)).unwrap();
        }
        assert_eq!(next_edge(&mut h.edges).await, BoundaryEdge::Stop);

        h.tx.send(SessionEvent::Stop).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn undecodable_chunk_does_not_stall() {
        let h = spawn_session(Box::new(HeuristicDetector::new(200.0, 10)));
        let bad = STANDARD.encode([1_u8, 2, 3]);
        h.tx.send(SessionEvent::Socket(SocketEvent::Frame(
            json!({"type": "audio", "data": bad}).to_string(),
        )))
        .unwrap();
        h.tx.send(audio_frame(42)).unwrap();

        assert!(wait_for(|| plays(&h.log) == vec!["play:1:42".to_string()]).await);
        h.tx.send(SessionEvent::Stop).unwrap();
        h.task.await.unwrap();
    }
}
