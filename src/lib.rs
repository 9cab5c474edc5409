//! Realtime voice client: socket transport, gapless playback of streamed
//! audio, speech-boundary publishing, and a half-duplex microphone uplink.
//!
//! Start with [`session::Conversation`].

pub mod audio;
pub mod boundary;
pub mod capture;
pub mod config;
pub mod inbound;
pub mod playback;
pub mod session;
pub mod transport;
