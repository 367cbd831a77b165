//! Consumer interaction table.
//!
//! Tracks every in-flight interaction initiated through this context, keyed
//! by transaction id. Synchronous interactions additionally leave the
//! receiving end of their response slot in a second map until the caller
//! waits on it. Only the send path creates synchronous interactions, and it
//! always either waits on the slot or abandons the transaction.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use mal_transport::{InteractionStage, Message, MessageHeader, StandardError, TransactionId};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::handler::InteractionListener;
use crate::interaction::{ConsumerInteraction, Response};
use crate::pattern;
use crate::supervisor::TimeoutSupervisor;
use crate::transaction_id;

/// Shared map of in-flight interactions.
pub(crate) type InteractionMap = Arc<DashMap<TransactionId, Arc<ConsumerInteraction>>>;

/// Table of consumer interactions awaiting replies.
///
/// Replies are routed without waiting on application code: listener calls
/// are queued per interaction and run on tasks of the table's tracker, so
/// the table has to be used from within a tokio runtime.
#[derive(Debug)]
pub struct InteractionTable {
    interactions: InteractionMap,
    responses: DashMap<TransactionId, oneshot::Receiver<Response>>,
    supervisor: TimeoutSupervisor,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl InteractionTable {
    /// Creates an empty table. `None` disables timeout supervision.
    pub fn new(timeout: Option<Duration>) -> Self {
        let interactions: InteractionMap = Arc::new(DashMap::new());
        let shutdown_token = CancellationToken::new();
        let task_tracker = TaskTracker::new();

        Self {
            supervisor: TimeoutSupervisor::new(
                timeout,
                interactions.clone(),
                shutdown_token.clone(),
                task_tracker.clone(),
            ),
            interactions,
            responses: DashMap::new(),
            shutdown_token,
            task_tracker,
        }
    }

    /// Allocates a transaction id without tracking anything.
    pub fn next_transaction_id(&self) -> TransactionId {
        transaction_id::next()
    }

    /// Allocates an id for a new asynchronous interaction starting with
    /// `initial_stage` and starts tracking it. Replies go to `listener`.
    ///
    /// SEND and PUBLISH expect no reply, so only an id is allocated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if `initial_stage` does not open an
    /// interaction, if the table was shut down, or if timeouts are enabled
    /// outside a tokio runtime.
    pub fn create_transaction(
        &self,
        initial_stage: InteractionStage,
        listener: Option<Arc<dyn InteractionListener>>,
    ) -> Result<TransactionId> {
        self.create(initial_stage, false, listener)
    }

    /// Like [`create_transaction`](Self::create_transaction), with a response
    /// slot for [`wait_for_response`](Self::wait_for_response). The caller
    /// must wait on the slot or [`abandon`](Self::abandon) the transaction.
    pub(crate) fn create_synchronous_transaction(
        &self,
        initial_stage: InteractionStage,
        listener: Option<Arc<dyn InteractionListener>>,
    ) -> Result<TransactionId> {
        self.create(initial_stage, true, listener)
    }

    fn create(
        &self,
        initial_stage: InteractionStage,
        synchronous: bool,
        listener: Option<Arc<dyn InteractionListener>>,
    ) -> Result<TransactionId> {
        if !pattern::is_initiating(initial_stage) {
            return Err(Error::Internal(format!(
                "{initial_stage} does not start an interaction"
            )));
        }
        self.ensure_open()?;

        let transaction_id = self.next_transaction_id();
        if pattern::first_reply(initial_stage).is_none() {
            return Ok(transaction_id);
        }

        let slot = if synchronous {
            let (tx, rx) = oneshot::channel();
            self.responses.insert(transaction_id, rx);
            Some(tx)
        } else {
            None
        };

        let interaction = Arc::new(ConsumerInteraction::new(
            transaction_id,
            initial_stage,
            slot,
            listener,
        ));
        self.interactions.insert(transaction_id, interaction.clone());

        if let Err(e) = self.supervisor.watch(&interaction) {
            self.abandon(transaction_id);
            return Err(e);
        }

        debug!(
            transaction_id = %transaction_id,
            stage = %initial_stage,
            synchronous,
            "Created transaction"
        );

        Ok(transaction_id)
    }

    /// Resumes tracking an interaction created elsewhere, typically before a
    /// restart, whose last exchanged stage was `last_stage`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionExists`] if the id is already tracked and
    /// [`Error::Internal`] if the table was shut down.
    pub fn continue_transaction(
        &self,
        last_stage: InteractionStage,
        transaction_id: TransactionId,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<()> {
        self.ensure_open()?;

        let interaction = Arc::new(ConsumerInteraction::new(
            transaction_id,
            last_stage,
            None,
            Some(listener),
        ));

        match self.interactions.entry(transaction_id) {
            Entry::Occupied(_) => return Err(Error::TransactionExists(transaction_id)),
            Entry::Vacant(entry) => {
                entry.insert(interaction.clone());
            }
        }

        if let Err(e) = self.supervisor.watch(&interaction) {
            self.abandon(transaction_id);
            return Err(e);
        }

        debug!(transaction_id = %transaction_id, stage = %last_stage, "Continued transaction");

        Ok(())
    }

    /// Timeouts are no longer checked after shutdown, so nothing new may be
    /// tracked.
    fn ensure_open(&self) -> Result<()> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::Internal("interaction table is shut down".to_string()));
        }
        Ok(())
    }

    /// Waits for the first reply of a synchronous interaction.
    ///
    /// Returns `Ok(None)` when the interaction is not synchronous or was
    /// already waited for.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Interaction`] if the interaction ended with an error
    /// (error reply, transport failure or timeout), and [`Error::Internal`]
    /// if it was dropped without any outcome.
    pub(crate) async fn wait_for_response(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<Message>> {
        let Some((_, rx)) = self.responses.remove(&transaction_id) else {
            return Ok(None);
        };

        match rx.await {
            Ok(Ok(message)) => Ok(Some(message)),
            Ok(Err(error)) => Err(Error::Interaction(error)),
            Err(_) => Err(Error::Internal(format!(
                "transaction {transaction_id} ended without a reply"
            ))),
        }
    }

    /// Routes an inbound reply to its interaction. The waiting caller is
    /// answered before this returns; the listener is called on its own task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandlerNotFound`] for an unknown or completed
    /// transaction and [`Error::UnexpectedStage`] for an out-of-order stage.
    pub fn handle_stage(&self, message: Message) -> Result<()> {
        let transaction_id = message.header().transaction_id;

        let Some(interaction) = self
            .interactions
            .get(&transaction_id)
            .map(|entry| entry.value().clone())
        else {
            warn!(
                transaction_id = %transaction_id,
                stage = %message.header().interaction_stage,
                "No handler found for inbound stage"
            );
            return Err(Error::HandlerNotFound(transaction_id));
        };

        let delivery = interaction.accept(message)?;

        if interaction.is_finished() {
            self.interactions
                .remove_if(&transaction_id, |_, tracked| Arc::ptr_eq(tracked, &interaction));
        }

        delivery.dispatch(&self.task_tracker);

        Ok(())
    }

    /// Ends an interaction with an error raised locally: a transmit failure
    /// or a timeout.
    ///
    /// Returns whether the error was delivered; a second call for the same
    /// transaction finds nothing. The QoS properties of `header` play no part
    /// in routing the error.
    pub fn handle_error(&self, header: &MessageHeader, error: StandardError) -> bool {
        let transaction_id = header.transaction_id;

        let Some((_, interaction)) = self.interactions.remove(&transaction_id) else {
            debug!(transaction_id = %transaction_id, "No interaction left for error {}", error);
            return false;
        };

        match interaction.fail(error) {
            Some(delivery) => {
                delivery.dispatch(&self.task_tracker);
                true
            }
            None => false,
        }
    }

    /// Forgets an interaction whose initiating message could not be sent.
    pub(crate) fn abandon(&self, transaction_id: TransactionId) {
        self.interactions.remove(&transaction_id);
        self.responses.remove(&transaction_id);
    }

    /// Whether the transaction is in flight.
    pub fn contains(&self, transaction_id: TransactionId) -> bool {
        self.interactions.contains_key(&transaction_id)
    }

    /// Number of interactions in flight.
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether no interaction is in flight.
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// The timeout supervisor.
    pub const fn supervisor(&self) -> &TimeoutSupervisor {
        &self.supervisor
    }

    /// Stops the timeout supervisor and waits for queued listener calls.
    /// Creating or continuing transactions fails afterwards.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }
}
