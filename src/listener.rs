//! Listener Queue (C2)
//!
//! Per-subscription bounded buffer of answers, with a `send_stop` flag the
//! transport consults when a subscriber cancels early (§3, §4.4).
//!
//! The shared control block ([`ListenerState`]) is cheap to clone and lives
//! both in the transport's listener map and in the subscriber's
//! [`crate::transport::SubscriptionStream`]; the `mpsc::Receiver` half is
//! handed only to the subscriber so `get` never needs `&mut` through a
//! shared reference.

use crate::error::GqlError;
use crate::model::ExecutionResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One item flowing out of a listener: a successful answer or a terminal
/// error.
#[derive(Debug, Clone)]
pub enum QueueItem {
    Answer(ExecutionResult),
    Error(GqlError),
}

/// Shared control block for one subscription's queue.
pub struct ListenerState {
    query_id: i64,
    sender: mpsc::Sender<QueueItem>,
    closed: AtomicBool,
    send_stop: AtomicBool,
}

impl ListenerState {
    /// Create a new listener, returning the shared state and the receiving
    /// half of its channel.
    pub fn new(
        query_id: i64,
        capacity: usize,
        send_stop: bool,
    ) -> (Arc<Self>, mpsc::Receiver<QueueItem>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let state = ListenerState {
            query_id,
            sender,
            closed: AtomicBool::new(false),
            send_stop: AtomicBool::new(send_stop),
        };
        (Arc::new(state), receiver)
    }

    pub fn query_id(&self) -> i64 {
        self.query_id
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn send_stop(&self) -> bool {
        self.send_stop.load(Ordering::Acquire)
    }

    /// The server has already ended the stream; a cancellation no longer
    /// needs to emit stop/complete.
    pub fn clear_send_stop(&self) {
        self.send_stop.store(false, Ordering::Release);
    }

    /// Enqueue an answer. No-op if the queue is already closed.
    pub async fn put(&self, item: ExecutionResult) {
        if self.closed() {
            return;
        }
        let _ = self.sender.send(QueueItem::Answer(item)).await;
    }

    /// Enqueue a terminal error and close the queue.
    pub async fn put_error(&self, err: GqlError) {
        if self.closed() {
            return;
        }
        self.closed.store(true, Ordering::Release);
        let _ = self.sender.send(QueueItem::Error(err)).await;
    }

    /// Mark complete: no more items will ever be enqueued.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Drains buffered items non-blockingly, then blocks awaiting arrival, as
/// specified for `get` (§4.2). Returns `None` once the queue is closed and
/// drained rather than waiting on a sender that will never send again.
pub async fn get_next(
    state: &ListenerState,
    receiver: &mut mpsc::Receiver<QueueItem>,
) -> Option<QueueItem> {
    match receiver.try_recv() {
        Ok(item) => return Some(item),
        Err(mpsc::error::TryRecvError::Disconnected) => return None,
        Err(mpsc::error::TryRecvError::Empty) => {}
    }
    if state.closed() {
        return None;
    }
    receiver.recv().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get_preserves_order() {
        let (state, mut receiver) = ListenerState::new(1, 8, true);
        state
            .put(ExecutionResult {
                data: Some(serde_json::json!(1)),
                ..Default::default()
            })
            .await;
        state
            .put(ExecutionResult {
                data: Some(serde_json::json!(2)),
                ..Default::default()
            })
            .await;

        let first = get_next(&state, &mut receiver).await.unwrap();
        let second = get_next(&state, &mut receiver).await.unwrap();
        match (first, second) {
            (QueueItem::Answer(a), QueueItem::Answer(b)) => {
                assert_eq!(a.data, Some(serde_json::json!(1)));
                assert_eq!(b.data, Some(serde_json::json!(2)));
            }
            _ => panic!("expected two answers"),
        }
    }

    #[tokio::test]
    async fn test_put_after_error_is_noop_and_queue_drains_to_none() {
        let (state, mut receiver) = ListenerState::new(1, 8, true);
        state.put_error(GqlError::Closed).await;
        state
            .put(ExecutionResult {
                data: Some(serde_json::json!("late")),
                ..Default::default()
            })
            .await;

        let item = get_next(&state, &mut receiver).await.unwrap();
        assert!(matches!(item, QueueItem::Error(GqlError::Closed)));
        assert!(get_next(&state, &mut receiver).await.is_none());
    }

    #[test]
    fn test_clear_send_stop_on_complete() {
        let (state, _receiver) = ListenerState::new(1, 8, true);
        assert!(state.send_stop());
        state.clear_send_stop();
        assert!(!state.send_stop());
    }
}
