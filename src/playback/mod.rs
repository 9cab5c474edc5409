//! Audio playback engine.
//!
//! ```text
//! enqueue(chunk | EndMarker) ──▶ PlaybackQueue ──drain──▶ decode ──▶ AudioSink
//!                                     ▲                                │
//!                                     └──── on_clip_finished(seq) ◀────┘
//! ```
//!
//! At most one chunk is in flight to the sink at a time, so output order is
//! exactly enqueue order.

pub mod decode;
pub mod engine;
pub mod queue;
pub mod sink;

pub use decode::{decode_chunk, DecodeError, DecodedAudio};
pub use engine::{DrainStep, PlaybackEngine};
pub use queue::{AudioChunk, PlaybackQueue, QueueItem};
pub use sink::{AudioSink, ClipDoneCallback, SinkError, SpeakerSink};
