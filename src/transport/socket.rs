//! Websocket signaling client.
//!
//! [`SignalingClient::connect`] performs the handshake under a
//! [`RetryPolicy`], then splits the socket into two background tasks:
//!
//! * writer: drains an unbounded channel of outgoing frames;
//! * reader: hands every inbound text frame, then exactly one terminal
//!   [`SocketEvent::Closed`], to the caller's callback.
//!
//! Callers send through the [`Uplink`] trait, which the capture path and the
//! session also accept as a test seam.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::backoff::{retry_with_backoff, RetryPolicy};
use super::protocol::OutboundMessage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// ConnectionError
// ---------------------------------------------------------------------------

/// Socket-level failures.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// Every handshake attempt failed.
    #[error("could not connect after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The readiness poll ran out of time.
    #[error("socket did not become ready within {0:?}")]
    ReadyTimeout(Duration),

    /// A send was attempted while the socket was not open.
    #[error("socket is not open")]
    NotOpen,

    /// The socket closed, locally or remotely.
    #[error("socket closed ({})", reason.as_deref().unwrap_or("no reason given"))]
    Closed { reason: Option<String> },

    /// A frame could not be serialised.
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

// ---------------------------------------------------------------------------
// ReadyState
// ---------------------------------------------------------------------------

/// Lifecycle of the underlying socket, readable from any thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

#[derive(Debug, Clone)]
struct SharedReadyState(Arc<AtomicU8>);

impl SharedReadyState {
    fn new(state: ReadyState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    fn get(&self) -> ReadyState {
        ReadyState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ReadyState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// SocketEvent
// ---------------------------------------------------------------------------

/// What the reader task reports, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// One inbound text frame, unparsed.
    Frame(String),
    /// The socket is gone.  `abnormal` is false for a close this side asked
    /// for or a normal close from the peer.
    Closed {
        abnormal: bool,
        reason: Option<String>,
    },
}

/// Receives [`SocketEvent`]s from the reader task.
pub type SocketCallback = Arc<dyn Fn(SocketEvent) + Send + Sync>;

// ---------------------------------------------------------------------------
// Uplink trait
// ---------------------------------------------------------------------------

/// Outgoing half of a connection.
pub trait Uplink: Send + Sync {
    /// `true` while frames can be sent.
    fn is_open(&self) -> bool;

    /// Queue one frame for sending.  Never blocks.
    fn send(&self, message: &OutboundMessage) -> Result<(), ConnectionError>;

    /// Start a normal close.  Idempotent.
    fn close(&self);
}

// ---------------------------------------------------------------------------
// SignalingClient
// ---------------------------------------------------------------------------

/// A live websocket connection to the backend.
pub struct SignalingClient {
    address: String,
    tx: mpsc::UnboundedSender<Message>,
    state: SharedReadyState,
    reader: JoinHandle<()>,
}

impl SignalingClient {
    /// Connect to `address`, retrying the handshake per `policy`.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::RetriesExhausted`] once the attempt budget is spent.
    pub async fn connect(
        address: &str,
        policy: RetryPolicy,
        on_event: SocketCallback,
    ) -> Result<Self, ConnectionError> {
        let state = SharedReadyState::new(ReadyState::Connecting);

        let (stream, _response) = retry_with_backoff(policy, |attempt| {
            log::debug!("transport: connecting to {address} (attempt {})", attempt + 1);
            connect_async(address)
        })
        .await
        .map_err(|e| ConnectionError::RetriesExhausted {
            attempts: e.attempts,
            last_error: e.last_error.to_string(),
        })?;

        log::info!("transport: connected to {address}");

        let (write, read) = stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        state.set(ReadyState::Open);

        tokio::spawn(Self::writer_task(write, rx, state.clone()));
        let reader = tokio::spawn(Self::reader_task(read, state.clone(), on_event));

        Ok(Self {
            address: address.to_string(),
            tx,
            state,
            reader,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    /// Poll every `poll` until the socket is open, for at most `timeout`.
    ///
    /// The first check happens immediately.
    pub async fn wait_until_open(
        &self,
        poll: Duration,
        timeout: Duration,
    ) -> Result<(), ConnectionError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut ticker = tokio::time::interval(poll.max(Duration::from_millis(1)));

        loop {
            ticker.tick().await;
            match self.ready_state() {
                ReadyState::Open => return Ok(()),
                ReadyState::Closing | ReadyState::Closed => {
                    return Err(ConnectionError::Closed { reason: None })
                }
                ReadyState::Connecting => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ConnectionError::ReadyTimeout(timeout));
            }
        }
    }

    async fn writer_task(
        mut write: SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
        state: SharedReadyState,
    ) {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(e) = write.send(message).await {
                log::warn!("transport: send failed: {e}");
                state.set(ReadyState::Closed);
                break;
            }
            if closing {
                break;
            }
        }
        let _ = write.close().await;
        log::debug!("transport: writer task terminated");
    }

    async fn reader_task(
        mut read: SplitStream<WsStream>,
        state: SharedReadyState,
        on_event: SocketCallback,
    ) {
        let mut terminal = None;

        while let Some(result) = read.next().await {
            let requested = state.get() == ReadyState::Closing;
            match result {
                Ok(Message::Text(text)) => on_event(SocketEvent::Frame(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => {
                    log::debug!("transport: ignoring {} byte binary frame", bytes.len());
                }
                Ok(Message::Close(frame)) => {
                    let (abnormal, reason) = match frame {
                        Some(frame) => (
                            !requested
                                && !matches!(frame.code, CloseCode::Normal | CloseCode::Away),
                            Some(frame.reason.as_str().to_owned()).filter(|r| !r.is_empty()),
                        ),
                        None => (false, None),
                    };
                    terminal = Some(SocketEvent::Closed { abnormal, reason });
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    terminal = Some(SocketEvent::Closed {
                        abnormal: !requested,
                        reason: Some(e.to_string()),
                    });
                    break;
                }
            }
        }

        let requested = state.get() == ReadyState::Closing;
        state.set(ReadyState::Closed);
        let event = terminal.unwrap_or(SocketEvent::Closed {
            abnormal: !requested,
            reason: None,
        });
        log::info!("transport: socket closed ({event:?})");
        on_event(event);
    }
}

impl Uplink for SignalingClient {
    fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    fn send(&self, message: &OutboundMessage) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::NotOpen);
        }
        let text = message
            .to_json()
            .map_err(|e| ConnectionError::Encode(e.to_string()))?;
        self.tx
            .send(Message::text(text))
            .map_err(|_| ConnectionError::Closed {
                reason: Some("writer task ended".into()),
            })
    }

    fn close(&self) {
        if self.ready_state() != ReadyState::Open {
            return;
        }
        self.state.set(ReadyState::Closing);
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: String::new().into(),
        };
        let _ = self.tx.send(Message::Close(Some(frame)));
        log::debug!("transport: close requested for {}", self.address);
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        // Trailing reads from a connection being discarded must not reach
        // whoever owns the callback next.
        self.reader.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn collecting_callback() -> (SocketCallback, mpsc::UnboundedReceiver<SocketEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: SocketCallback = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        (callback, rx)
    }

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn exhausted_retries_report_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (callback, _rx) = collecting_callback();
        let result =
            SignalingClient::connect(&format!("ws://{addr}"), fast_policy(2), callback).await;

        match result {
            Err(ConnectionError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 2),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connect should fail"),
        }
    }

    #[tokio::test]
    async fn exchanges_frames_and_reports_normal_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (server_seen_tx, mut server_seen) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            ws.send(Message::text(r#"{"type":"audio_end"}"#)).await.unwrap();
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let _ = server_seen_tx.send(text.as_str().to_owned());
            }
            ws.close(None).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let (callback, mut events) = collecting_callback();
        let client = SignalingClient::connect(&format!("ws://{addr}"), fast_policy(1), callback)
            .await
            .unwrap();
        client
            .wait_until_open(Duration::from_millis(10), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(client.is_open());
        assert_eq!(client.address(), format!("ws://{addr}"));

        client.send(&OutboundMessage::WebsocketStop).unwrap();
        assert_eq!(
            server_seen.recv().await.unwrap(),
            r#"{"type":"websocket_stop"}"#
        );

        assert_eq!(
            events.recv().await.unwrap(),
            SocketEvent::Frame(r#"{"type":"audio_end"}"#.into())
        );
        match events.recv().await.unwrap() {
            SocketEvent::Closed { abnormal, .. } => assert!(!abnormal),
            other => panic!("expected close, got {other:?}"),
        }
        assert_eq!(client.ready_state(), ReadyState::Closed);
        assert!(matches!(
            client.send(&OutboundMessage::WebsocketStop),
            Err(ConnectionError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn local_close_is_not_abnormal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (callback, mut events) = collecting_callback();
        let client = SignalingClient::connect(&format!("ws://{addr}"), fast_policy(1), callback)
            .await
            .unwrap();
        client.close();
        client.close();

        match events.recv().await.unwrap() {
            SocketEvent::Closed { abnormal, .. } => assert!(!abnormal),
            other => panic!("expected close, got {other:?}"),
        }
        assert!(!client.is_open());
    }

    #[test]
    fn ready_state_round_trips_through_u8() {
        for state in [
            ReadyState::Connecting,
            ReadyState::Open,
            ReadyState::Closing,
            ReadyState::Closed,
        ] {
            assert_eq!(ReadyState::from_u8(state as u8), state);
        }
    }
}
