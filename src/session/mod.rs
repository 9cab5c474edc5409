//! Connection lifecycle: the per-connection actor and the controller that
//! starts and stops it.
//!
//! ```text
//!            Conversation (long-lived)
//!   publisher ─ messages ─ status ─ mic toggle
//!                     │ start / stop
//!                     ▼
//!            Session (one per connection)
//!   SignalingClient ─ PlaybackEngine ─ BoundaryDetector ─ CaptureSession
//! ```

pub mod conversation;
pub mod runner;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use conversation::{Conversation, Devices, SessionError, SystemDevices};
pub use runner::{Session, SessionEvent};
pub use state::{status_channel, ConnectionState, SessionStatus, StatusReceiver, StatusSender};
