//! Speech-boundary detection.
//!
//! Two policies implement [`BoundaryDetector`]:
//!
//! | Policy | Start edge | Stop edge |
//! |--------|-----------|-----------|
//! | [`ExplicitMarkerDetector`] | first chunk handed to the sink while idle | `audio_end` reaches the queue head |
//! | [`HeuristicDetector`] | first packet, or a gap > `gap_ms` while idle | more than `repeat_limit` consecutive zero-delta packets |
//!
//! Both keep a [`SpeechBoundaryState`], whose single `Option<f64>` makes
//! "active without a start time" unrepresentable.

use crate::config::{BoundaryConfig, BoundaryPolicy};

// ---------------------------------------------------------------------------
// SpeechBoundaryState
// ---------------------------------------------------------------------------

/// Whether the agent is audibly speaking, and since when.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpeechBoundaryState {
    active_since: Option<f64>,
}

impl SpeechBoundaryState {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn active_at(since: f64) -> Self {
        Self {
            active_since: Some(since),
        }
    }

    pub fn active(&self) -> bool {
        self.active_since.is_some()
    }

    /// Seconds since the UNIX epoch at which the current utterance began.
    pub fn active_since(&self) -> Option<f64> {
        self.active_since
    }
}

// ---------------------------------------------------------------------------
// BoundaryEdge
// ---------------------------------------------------------------------------

/// One-shot transition, emitted once per utterance boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundaryEdge {
    Start { at: f64 },
    Stop,
}

// ---------------------------------------------------------------------------
// BoundaryDetector trait
// ---------------------------------------------------------------------------

/// Turns playback and packet events into boundary edges.
///
/// Every method returns the edge it caused, if any, after updating
/// [`state`](Self::state).
pub trait BoundaryDetector: Send {
    /// A chunk has just been handed to the sink at `now_secs`.
    fn on_chunk_started(&mut self, now_secs: f64) -> Option<BoundaryEdge>;

    /// An `audio_end` marker reached the head of the playback queue.
    fn on_end_marker(&mut self) -> Option<BoundaryEdge>;

    /// An audio packet arrived carrying (or received at) `timestamp_ms`.
    fn on_packet(&mut self, timestamp_ms: f64) -> Option<BoundaryEdge>;

    fn state(&self) -> SpeechBoundaryState;

    /// Forget everything; used on teardown.
    fn reset(&mut self);
}

/// Build the detector for the configured policy.
pub fn detector_for(config: &BoundaryConfig) -> Box<dyn BoundaryDetector> {
    match config.policy {
        BoundaryPolicy::ExplicitMarker => Box::new(ExplicitMarkerDetector::new()),
        BoundaryPolicy::Heuristic => {
            Box::new(HeuristicDetector::new(config.gap_ms as f64, config.repeat_limit))
        }
    }
}

fn stop(state: &mut SpeechBoundaryState) -> Option<BoundaryEdge> {
    if state.active() {
        *state = SpeechBoundaryState::idle();
        Some(BoundaryEdge::Stop)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// ExplicitMarkerDetector
// ---------------------------------------------------------------------------

/// Boundaries from the transport's `audio_end` markers.
#[derive(Debug, Default)]
pub struct ExplicitMarkerDetector {
    state: SpeechBoundaryState,
}

impl ExplicitMarkerDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BoundaryDetector for ExplicitMarkerDetector {
    fn on_chunk_started(&mut self, now_secs: f64) -> Option<BoundaryEdge> {
        if self.state.active() {
            return None;
        }
        self.state = SpeechBoundaryState::active_at(now_secs);
        Some(BoundaryEdge::Start { at: now_secs })
    }

    fn on_end_marker(&mut self) -> Option<BoundaryEdge> {
        stop(&mut self.state)
    }

    fn on_packet(&mut self, _timestamp_ms: f64) -> Option<BoundaryEdge> {
        None
    }

    fn state(&self) -> SpeechBoundaryState {
        self.state
    }

    fn reset(&mut self) {
        self.state = SpeechBoundaryState::idle();
    }
}

// ---------------------------------------------------------------------------
// HeuristicDetector
// ---------------------------------------------------------------------------

/// Boundaries inferred from packet timestamps, for transports without
/// reliable end markers.
#[derive(Debug)]
pub struct HeuristicDetector {
    gap_ms: f64,
    repeat_limit: u32,
    state: SpeechBoundaryState,
    prev_timestamp: Option<f64>,
    repeats: u32,
}

impl HeuristicDetector {
    pub fn new(gap_ms: f64, repeat_limit: u32) -> Self {
        Self {
            gap_ms,
            repeat_limit,
            state: SpeechBoundaryState::idle(),
            prev_timestamp: None,
            repeats: 0,
        }
    }

    fn start(&mut self, timestamp_ms: f64) -> Option<BoundaryEdge> {
        let at = timestamp_ms / 1000.0;
        self.state = SpeechBoundaryState::active_at(at);
        self.repeats = 0;
        Some(BoundaryEdge::Start { at })
    }
}

impl BoundaryDetector for HeuristicDetector {
    fn on_chunk_started(&mut self, _now_secs: f64) -> Option<BoundaryEdge> {
        None
    }

    fn on_end_marker(&mut self) -> Option<BoundaryEdge> {
        self.repeats = 0;
        stop(&mut self.state)
    }

    fn on_packet(&mut self, timestamp_ms: f64) -> Option<BoundaryEdge> {
        let prev = self.prev_timestamp.replace(timestamp_ms);

        let Some(prev) = prev else {
            return if self.state.active() {
                None
            } else {
                self.start(timestamp_ms)
            };
        };

        let delta = timestamp_ms - prev;
        if delta > self.gap_ms {
            self.repeats = 0;
            if self.state.active() {
                None
            } else {
                self.start(timestamp_ms)
            }
        } else if delta == 0.0 {
            if !self.state.active() {
                return None;
            }
            self.repeats += 1;
            if self.repeats > self.repeat_limit {
                self.repeats = 0;
                stop(&mut self.state)
            } else {
                None
            }
        } else {
            self.repeats = 0;
            None
        }
    }

    fn state(&self) -> SpeechBoundaryState {
        self.state
    }

    fn reset(&mut self) {
        self.state = SpeechBoundaryState::idle();
        self.prev_timestamp = None;
        self.repeats = 0;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
