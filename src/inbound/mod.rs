//! Inbound message demultiplexer.
//!
//! ```text
//! text frame ──classify──▶ Audio{bytes}  ──▶ PlaybackQueue (chunk)
//!                       ├─▶ AudioEnd      ──▶ PlaybackQueue (end marker)
//!                       ├─▶ Message(json) ──▶ MessageQueue
//!                       └─▶ Err(ParseError) → logged, dropped
//! ```

pub mod demux;
pub mod messages;

pub use demux::{classify, Inbound, ParseError};
pub use messages::MessageQueue;
