//! Ordered queue of audio chunks and utterance end markers.

use std::collections::VecDeque;

/// One inbound audio chunk, still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub bytes: Vec<u8>,
    /// Arrival ordinal within the session, for diagnostics.
    pub seq: u64,
}

/// An entry in the playback queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem {
    Chunk(AudioChunk),
    /// The backend's `audio_end`: everything queued before it belongs to the
    /// utterance it closes.
    EndMarker,
}

/// FIFO of [`QueueItem`]s.  Arrival order is preserved across chunks and
/// markers.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    items: VecDeque<QueueItem>,
    next_seq: u64,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk; returns the sequence number it was given.
    pub fn push_chunk(&mut self, bytes: Vec<u8>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.push_back(QueueItem::Chunk(AudioChunk { bytes, seq }));
        seq
    }

    pub fn push_end_marker(&mut self) {
        self.items.push_back(QueueItem::EndMarker);
    }

    pub fn pop_front(&mut self) -> Option<QueueItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop everything queued.  Sequence numbers keep counting.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}
