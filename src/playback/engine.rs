//! The playback engine: strict FIFO draining with at most one clip in flight.
//!
//! The engine owns the [`PlaybackQueue`] and the [`AudioSink`].  It never
//! blocks; the session calls [`PlaybackEngine::drain`] after every enqueue
//! and after every [`PlaybackEngine::on_clip_finished`], and reacts to the
//! returned [`DrainStep`]s (boundary detection, logging).

use super::decode::decode_chunk;
use super::queue::{PlaybackQueue, QueueItem};
use super::sink::AudioSink;

/// What one pass of [`PlaybackEngine::drain`] did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainStep {
    /// Chunk `seq` was decoded and handed to the sink.
    Started { seq: u64 },
    /// An end marker reached the head of the queue.
    EndMarker,
    /// Chunk `seq` could not be decoded or submitted and was skipped.
    Failed { seq: u64 },
}

pub struct PlaybackEngine {
    queue: PlaybackQueue,
    sink: Box<dyn AudioSink>,
    /// Sequence number of the chunk currently playing.
    in_flight: Option<u64>,
    fallback_rate: u32,
}

impl PlaybackEngine {
    /// `fallback_rate` is the sample rate assumed for header-less PCM16
    /// chunks.
    pub fn new(sink: Box<dyn AudioSink>, fallback_rate: u32) -> Self {
        Self {
            queue: PlaybackQueue::new(),
            sink,
            in_flight: None,
            fallback_rate,
        }
    }

    /// Append a chunk to the tail.  Returns its sequence number.
    pub fn enqueue_chunk(&mut self, bytes: Vec<u8>) -> u64 {
        self.queue.push_chunk(bytes)
    }

    pub fn enqueue_end_marker(&mut self) {
        self.queue.push_end_marker();
    }

    /// `true` while a clip is playing.
    pub fn is_playing(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Dequeue from the head while nothing is in flight.
    ///
    /// End markers never stall the drain.  A chunk that fails to decode or
    /// submit is logged and skipped.
    pub fn drain(&mut self) -> Vec<DrainStep> {
        let mut steps = Vec::new();

        while self.in_flight.is_none() {
            let Some(item) = self.queue.pop_front() else {
                break;
            };
            match item {
                QueueItem::EndMarker => steps.push(DrainStep::EndMarker),
                QueueItem::Chunk(chunk) => {
                    let seq = chunk.seq;
                    let clip = match decode_chunk(&chunk.bytes, self.fallback_rate) {
                        Ok(clip) => clip,
                        Err(e) => {
                            log::error!("playback: dropping chunk {seq}: {e}");
                            steps.push(DrainStep::Failed { seq });
                            continue;
                        }
                    };
                    log::debug!(
                        "playback: chunk {seq} → sink ({:.3}s)",
                        clip.duration_secs()
                    );
                    // Mark in flight before submitting: a sink may report an
                    // empty clip as finished synchronously.
                    self.in_flight = Some(seq);
                    match self.sink.submit(seq, clip) {
                        Ok(()) => steps.push(DrainStep::Started { seq }),
                        Err(e) => {
                            log::error!("playback: sink rejected chunk {seq}: {e}");
                            self.in_flight = None;
                            steps.push(DrainStep::Failed { seq });
                        }
                    }
                }
            }
        }

        steps
    }

    /// Record that the sink finished clip `seq`.  Returns `false` for a stale
    /// id (for example one finishing after [`clear`](Self::clear)).
    pub fn on_clip_finished(&mut self, seq: u64) -> bool {
        if self.in_flight == Some(seq) {
            self.in_flight = None;
            true
        } else {
            log::debug!("playback: ignoring completion of stale clip {seq}");
            false
        }
    }

    /// Drop all queued items and silence the sink.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.sink.clear();
        self.in_flight = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
