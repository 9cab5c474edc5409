//! Speech-boundary detection and the timeline publisher.
//!
//! The session feeds a [`BoundaryDetector`] with playback and packet events
//! and forwards every result to the [`TimelinePublisher`], which external
//! animation code reads through a [`BoundaryView`] and an edge stream.

pub mod detector;
pub mod publisher;

pub use detector::{
    detector_for, BoundaryDetector, BoundaryEdge, ExplicitMarkerDetector, HeuristicDetector,
    SpeechBoundaryState,
};
pub use publisher::{BoundaryView, TimelinePublisher};
