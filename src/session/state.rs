//! Connection lifecycle state, published to the UI layer.
//!
//! [`SessionStatus`] pairs the current [`ConnectionState`] with the last
//! terminal error.  It is shared through a `tokio::sync::watch` channel
//! ([`StatusSender`] / [`StatusReceiver`]); the conversation controller and
//! the session actor write it, any number of readers observe it.

use tokio::sync::watch;

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// States of one conversation attempt.
///
/// ```text
/// Idle ──start──▶ Connecting ──socket open──▶ Connected
///                     │                           │
///                     └──discovery / retries / ───┴──abnormal close──▶ Error
///                        permission failure
/// Connected ──stop / normal close──▶ Idle
/// Error ──start──▶ Connecting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection; the initial and post-stop state.
    #[default]
    Idle,

    /// Resolving the address, retrying the handshake, or waiting for the
    /// socket to become ready.
    Connecting,

    /// The socket is open and audio flows.
    Connected,

    /// The last attempt failed or the connection dropped abnormally.
    Error,
}

impl ConnectionState {
    /// `true` while an attempt is in progress or a connection is live.
    ///
    /// ```
    /// use realtime_voice::session::ConnectionState;
    ///
    /// assert!(!ConnectionState::Idle.is_busy());
    /// assert!(ConnectionState::Connecting.is_busy());
    /// assert!(ConnectionState::Connected.is_busy());
    /// assert!(!ConnectionState::Error.is_busy());
    /// ```
    pub fn is_busy(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }

    /// A short human-readable label for status displays.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Error => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// Current state plus the message to show when `state == Error`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub error: Option<String>,
}

impl SessionStatus {
    pub fn new(state: ConnectionState) -> Self {
        Self { state, error: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            state: ConnectionState::Error,
            error: Some(message.into()),
        }
    }
}

pub type StatusSender = watch::Sender<SessionStatus>;
pub type StatusReceiver = watch::Receiver<SessionStatus>;

/// A status channel starting at `Idle`.
pub fn status_channel() -> (StatusSender, StatusReceiver) {
    watch::channel(SessionStatus::default())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        assert_eq!(ConnectionState::Idle.label(), "Idle");
        assert_eq!(ConnectionState::Connecting.label(), "Connecting");
        assert_eq!(ConnectionState::Connected.label(), "Connected");
        assert_eq!(ConnectionState::Error.label(), "Error");
    }

    #[test]
    fn default_status_is_idle_without_error() {
        let status = SessionStatus::default();
        assert_eq!(status.state, ConnectionState::Idle);
        assert!(status.error.is_none());
    }

    #[test]
    fn error_status_carries_message() {
        let status = SessionStatus::error("retries exhausted");
        assert_eq!(status.state, ConnectionState::Error);
        assert_eq!(status.error.as_deref(), Some("retries exhausted"));
    }

    #[test]
    fn receivers_see_updates() {
        let (tx, rx) = status_channel();
        tx.send_replace(SessionStatus::new(ConnectionState::Connected));
        assert_eq!(rx.borrow().state, ConnectionState::Connected);
    }
}
