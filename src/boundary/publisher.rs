//! Read-only boundary view and edge stream for external consumers.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use super::detector::{BoundaryEdge, SpeechBoundaryState};

const EDGE_CAPACITY: usize = 64;

struct Channels {
    state: watch::Sender<SpeechBoundaryState>,
    edges: broadcast::Sender<BoundaryEdge>,
}

/// Publishes the boundary level through a `watch` channel and start/stop
/// edges through a `broadcast` channel.
///
/// Cheap to clone.  Outlives individual sessions, so consumers can subscribe
/// once and keep their handles across reconnects.
#[derive(Clone)]
pub struct TimelinePublisher {
    inner: Arc<Channels>,
}

impl Default for TimelinePublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl TimelinePublisher {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SpeechBoundaryState::idle());
        let (edges, _) = broadcast::channel(EDGE_CAPACITY);
        Self {
            inner: Arc::new(Channels { state, edges }),
        }
    }

    pub fn view(&self) -> BoundaryView {
        BoundaryView {
            rx: self.inner.state.subscribe(),
        }
    }

    /// Edge stream.  A lagging subscriber loses the oldest edges.
    pub fn subscribe_edges(&self) -> broadcast::Receiver<BoundaryEdge> {
        self.inner.edges.subscribe()
    }

    /// Publish a detector result.  The level is updated before the edge is
    /// sent, so an edge handler always reads the post-transition state.
    pub fn apply(&self, state: SpeechBoundaryState, edge: Option<BoundaryEdge>) {
        self.inner.state.send_replace(state);
        if let Some(edge) = edge {
            log::debug!("boundary: {edge:?}");
            // No subscribers is fine.
            let _ = self.inner.edges.send(edge);
        }
    }

    /// Return to idle, emitting a stop edge if an utterance was open.
    pub fn reset(&self) {
        let was_active = self.inner.state.borrow().active();
        let edge = was_active.then_some(BoundaryEdge::Stop);
        self.apply(SpeechBoundaryState::idle(), edge);
    }

    pub fn current(&self) -> SpeechBoundaryState {
        *self.inner.state.borrow()
    }
}

/// Read-only handle on the current `{active, activeSince}`.
#[derive(Clone)]
pub struct BoundaryView {
    rx: watch::Receiver<SpeechBoundaryState>,
}

impl BoundaryView {
    pub fn current(&self) -> SpeechBoundaryState {
        *self.rx.borrow()
    }

    pub fn active(&self) -> bool {
        self.current().active()
    }

    pub fn active_since(&self) -> Option<f64> {
        self.current().active_since()
    }

    /// Wait for the next change.  Errors once the publisher is gone.
    pub async fn changed(&mut self) -> Result<SpeechBoundaryState, watch::error::RecvError> {
        self.rx.changed().await?;
        Ok(*self.rx.borrow_and_update())
    }
}
