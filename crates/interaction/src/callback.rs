//! Ordered listener callbacks.
//!
//! Application listeners never run on the transport's delivery task. Each
//! [`CallbackQueue`] runs its callbacks one after another on a tracked task,
//! so callbacks for one interaction keep their arrival order while a slow or
//! blocking listener only holds up its own queue.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use mal_transport::{InteractionStage, Message, StandardError, TransactionId};
use parking_lot::Mutex;
use tokio_util::task::TaskTracker;
use tracing::error;

use crate::handler::{InteractionListener, panic_message};

/// A listener call ready to run.
pub(crate) type Callback = BoxFuture<'static, ()>;

/// Runs queued callbacks in order, at most one at a time.
#[derive(Default)]
pub(crate) struct CallbackQueue {
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Callback>,
    draining: bool,
}

impl CallbackQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues a callback. Returns true when no task is draining the queue
    /// and the caller has to start one with [`drain_on`](Self::drain_on).
    pub(crate) fn push(&self, callback: Callback) -> bool {
        let mut state = self.state.lock();
        state.pending.push_back(callback);
        !std::mem::replace(&mut state.draining, true)
    }

    /// Queues a callback and starts draining if needed.
    pub(crate) fn enqueue(self: &Arc<Self>, task_tracker: &TaskTracker, callback: Callback) {
        if self.push(callback) {
            self.clone().drain_on(task_tracker);
        }
    }

    /// Spawns the task running queued callbacks until the queue is empty.
    pub(crate) fn drain_on(self: Arc<Self>, task_tracker: &TaskTracker) {
        task_tracker.spawn(async move {
            loop {
                let next = {
                    let mut state = self.state.lock();
                    match state.pending.pop_front() {
                        Some(callback) => callback,
                        None => {
                            state.draining = false;
                            return;
                        }
                    }
                };
                next.await;
            }
        });
    }
}

impl std::fmt::Debug for CallbackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CallbackQueue")
            .field("pending", &state.pending.len())
            .field("draining", &state.draining)
            .finish()
    }
}

/// `stage_received` with panics caught and logged.
pub(crate) fn stage_callback(listener: Arc<dyn InteractionListener>, message: Message) -> Callback {
    Box::pin(async move {
        let transaction_id = message.header().transaction_id;
        let stage = message.header().interaction_stage;
        if let Err(panic) = AssertUnwindSafe(listener.stage_received(message))
            .catch_unwind()
            .await
        {
            error!(
                transaction_id = %transaction_id,
                stage = %stage,
                "Listener panicked on stage: {}",
                panic_message(panic.as_ref())
            );
        }
    })
}

/// `stage_error_received` with panics caught and logged.
pub(crate) fn error_callback(
    listener: Arc<dyn InteractionListener>,
    transaction_id: TransactionId,
    stage: InteractionStage,
    error: StandardError,
) -> Callback {
    Box::pin(async move {
        if let Err(panic) =
            AssertUnwindSafe(listener.stage_error_received(transaction_id, stage, error))
                .catch_unwind()
                .await
        {
            error!(
                transaction_id = %transaction_id,
                stage = %stage,
                "Listener panicked on error: {}",
                panic_message(panic.as_ref())
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::{mpsc, oneshot};

    #[tokio::test]
    async fn test_callbacks_run_in_push_order() {
        let task_tracker = TaskTracker::new();
        let queue = Arc::new(CallbackQueue::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let first = tx.clone();
        queue.enqueue(
            &task_tracker,
            Box::pin(async move {
                let _ = gate_rx.await;
                let _ = first.send(1);
            }),
        );
        for n in 2..=4 {
            let tx = tx.clone();
            queue.enqueue(&task_tracker, Box::pin(async move {
                let _ = tx.send(n);
            }));
        }

        gate_tx.send(()).unwrap();
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(rx.recv().await.unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3, 4]);

        task_tracker.close();
        task_tracker.wait().await;
        assert!(!queue.state.lock().draining);
    }

    struct PanickingListener;

    #[async_trait::async_trait]
    impl InteractionListener for PanickingListener {
        async fn stage_received(&self, _message: Message) {
            panic!("listener bug");
        }

        async fn stage_error_received(
            &self,
            _transaction_id: TransactionId,
            _stage: InteractionStage,
            _error: StandardError,
        ) {
            panic!("listener bug");
        }
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_stop_the_queue() {
        let task_tracker = TaskTracker::new();
        let queue = Arc::new(CallbackQueue::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        queue.enqueue(
            &task_tracker,
            error_callback(
                Arc::new(PanickingListener),
                TransactionId::from_raw(1),
                InteractionStage::RequestResponse,
                StandardError::new(mal_transport::ErrorCode::DeliveryTimeout),
            ),
        );
        queue.enqueue(&task_tracker, Box::pin(async move {
            let _ = tx.send("after");
        }));

        assert_eq!(rx.recv().await, Some("after"));
    }
}
