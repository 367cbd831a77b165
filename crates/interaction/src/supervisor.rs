//! Timeout supervision for consumer interactions.
//!
//! One background task walks a deadline queue. Deadlines are pushed in
//! creation order with a single configured timeout, so the queue is always
//! sorted. Interactions that finish early are not removed from the queue;
//! their entry only holds a weak reference and is dropped when its deadline
//! comes up.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use mal_transport::{ErrorCode, StandardError, TransactionId};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::interaction::ConsumerInteraction;
use crate::table::InteractionMap;

struct Watch {
    deadline: Instant,
    transaction_id: TransactionId,
    interaction: Weak<ConsumerInteraction>,
}

/// Fires a `DELIVERY_TIMEOUT` error for interactions that outlive the
/// configured timeout.
pub struct TimeoutSupervisor {
    timeout: Option<Duration>,
    queue: Arc<Mutex<VecDeque<Watch>>>,
    wakeup: Arc<Notify>,
    started: AtomicBool,
    interactions: InteractionMap,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl TimeoutSupervisor {
    pub(crate) fn new(
        timeout: Option<Duration>,
        interactions: InteractionMap,
        shutdown_token: CancellationToken,
        task_tracker: TaskTracker,
    ) -> Self {
        Self {
            timeout,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            wakeup: Arc::new(Notify::new()),
            started: AtomicBool::new(false),
            interactions,
            shutdown_token,
            task_tracker,
        }
    }

    /// Whether the background task has been spawned.
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Number of deadlines not yet checked, finished interactions included.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Starts watching an interaction. The first call spawns the background
    /// task; nothing is spawned while timeouts are disabled.
    pub(crate) fn watch(&self, interaction: &Arc<ConsumerInteraction>) -> Result<()> {
        let Some(timeout) = self.timeout else {
            return Ok(());
        };

        if !self.started.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.start() {
                self.started.store(false, Ordering::Release);
                return Err(e);
            }
        }

        {
            let mut queue = self.queue.lock();
            queue.push_back(Watch {
                deadline: Instant::now() + timeout,
                transaction_id: interaction.transaction_id(),
                interaction: Arc::downgrade(interaction),
            });
        }
        self.wakeup.notify_one();

        Ok(())
    }

    fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Internal(format!("timeout supervisor needs a runtime: {e}")))?;

        let queue = self.queue.clone();
        let wakeup = self.wakeup.clone();
        let interactions = self.interactions.clone();
        let shutdown_token = self.shutdown_token.clone();
        let task_tracker = self.task_tracker.clone();

        info!("Starting timeout supervisor");

        self.task_tracker.spawn_on(
            async move {
                loop {
                    let next = queue.lock().pop_front();

                    let Some(watch) = next else {
                        tokio::select! {
                            () = wakeup.notified() => {}
                            () = shutdown_token.cancelled() => break,
                        }
                        continue;
                    };

                    tokio::select! {
                        () = tokio::time::sleep_until(watch.deadline) => {}
                        () = shutdown_token.cancelled() => break,
                    }

                    expire(&interactions, &task_tracker, watch);
                }

                debug!("Timeout supervisor stopped");
            },
            &runtime,
        );

        Ok(())
    }
}

fn expire(interactions: &InteractionMap, task_tracker: &TaskTracker, watch: Watch) {
    let Some(interaction) = watch.interaction.upgrade() else {
        return;
    };
    if interaction.is_finished() {
        return;
    }

    interactions.remove_if(&watch.transaction_id, |_, tracked| {
        Arc::ptr_eq(tracked, &interaction)
    });

    // The listener runs on its own task; a panic there never reaches this loop
    if let Some(delivery) = interaction.fail(StandardError::new(ErrorCode::DeliveryTimeout)) {
        warn!(transaction_id = %watch.transaction_id, "Interaction timed out");
        delivery.dispatch(task_tracker);
    }
}

impl std::fmt::Debug for TimeoutSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutSupervisor")
            .field("timeout", &self.timeout)
            .field("running", &self.is_running())
            .field("pending", &self.pending())
            .finish()
    }
}
