//! FIFO of application messages awaiting an external consumer.
//!
//! The consumer (an animation or UI driver) looks at the head with
//! [`MessageQueue::front`], acts on it, then calls
//! [`MessageQueue::remove_first`].  Messages are never consumed implicitly.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

/// Cloneable handle to the shared message list.
#[derive(Debug, Clone, Default)]
pub struct MessageQueue {
    inner: Arc<Mutex<VecDeque<Value>>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Value>> {
        // A panicking consumer must not wedge the session.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append to the tail.
    pub fn push(&self, message: Value) {
        if let Some(text) = message.get("text").and_then(Value::as_str) {
            log::info!("inbound: received text {text:?}");
        }
        self.lock().push_back(message);
    }

    /// A copy of the head, if any.
    pub fn front(&self) -> Option<Value> {
        self.lock().front().cloned()
    }

    /// Drop the head after it has been processed.
    pub fn remove_first(&self) -> Option<Value> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// All queued messages, head first.
    pub fn snapshot(&self) -> Vec<Value> {
        self.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn consumed_strictly_from_head() {
        let queue = MessageQueue::new();
        queue.push(json!({"text": "one"}));
        queue.push(json!({"text": "two"}));

        assert_eq!(queue.front(), Some(json!({"text": "one"})));
        // Peeking does not consume.
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.remove_first(), Some(json!({"text": "one"})));
        assert_eq!(queue.front(), Some(json!({"text": "two"})));
        assert_eq!(queue.remove_first(), Some(json!({"text": "two"})));
        assert!(queue.is_empty());
        assert_eq!(queue.remove_first(), None);
    }

    #[test]
    fn clones_share_state() {
        let producer = MessageQueue::new();
        let consumer = producer.clone();
        producer.push(json!({"animation": "wave"}));
        assert_eq!(consumer.snapshot(), vec![json!({"animation": "wave"})]);
    }

    #[test]
    fn handle_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MessageQueue>();
    }
}
