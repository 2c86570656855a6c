//! The `Stream` a subscriber polls for answers, and the cancellation cleanup
//! that runs when it is dropped early (§4.4, §5).

use super::Transport;
use crate::error::Result;
use crate::listener::{ListenerState, QueueItem};
use crate::model::ExecutionResult;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// A live subscription. Polling yields one `Result<ExecutionResult>` per
/// server answer; the stream ends after a `complete` message or a terminal
/// error.
///
/// Dropping the stream before it ends cancels the subscription: a background
/// task is spawned to emit the stop/complete frame (if the server hasn't
/// already ended the operation) and remove the listener, since `Drop` cannot
/// `.await` directly.
pub struct SubscriptionStream {
    transport: Transport,
    id: i64,
    state: Arc<ListenerState>,
    receiver: Option<mpsc::Receiver<QueueItem>>,
    done: bool,
}

impl std::fmt::Debug for SubscriptionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionStream")
            .field("id", &self.id)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl SubscriptionStream {
    pub(crate) fn new(
        transport: Transport,
        id: i64,
        state: Arc<ListenerState>,
        receiver: mpsc::Receiver<QueueItem>,
    ) -> Self {
        SubscriptionStream {
            transport,
            id,
            state,
            receiver: Some(receiver),
            done: false,
        }
    }

    pub fn query_id(&self) -> i64 {
        self.id
    }

    /// Run the cancellation cleanup inline and mark the stream done, so the
    /// `Drop` impl below has nothing left to spawn. Used by the blocking
    /// façade, which can `.await` this directly before unwinding instead of
    /// relying on a detached task.
    pub(crate) async fn cancel(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.transport.cancel_subscription(self.id).await;
    }

    /// Pull the next answer, used by `execute`'s single-shot path as well as
    /// manual iteration outside the `Stream` trait.
    pub async fn next_item(&mut self) -> Option<Result<ExecutionResult>> {
        if self.done {
            return None;
        }
        let receiver = self.receiver.as_mut()?;
        match super::next_queue_item(&self.state, receiver).await {
            Some(QueueItem::Answer(result)) => Some(Ok(result)),
            Some(QueueItem::Error(err)) => {
                self.done = true;
                Some(Err(err))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl Stream for SubscriptionStream {
    type Item = Result<ExecutionResult>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        let Some(receiver) = this.receiver.as_mut() else {
            return Poll::Ready(None);
        };

        if let Ok(item) = receiver.try_recv() {
            return Poll::Ready(Some(match item {
                QueueItem::Answer(result) => Ok(result),
                QueueItem::Error(err) => {
                    this.done = true;
                    Err(err)
                }
            }));
        }
        if this.state.closed() {
            this.done = true;
            return Poll::Ready(None);
        }

        match receiver.poll_recv(cx) {
            Poll::Ready(Some(QueueItem::Answer(result))) => Poll::Ready(Some(Ok(result))),
            Poll::Ready(Some(QueueItem::Error(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let transport = self.transport.clone();
        let id = self.id;
        tokio::spawn(async move {
            transport.cancel_subscription(id).await;
        });
    }
}

