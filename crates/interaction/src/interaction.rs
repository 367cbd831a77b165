//! Consumer-side interaction state.
//!
//! A [`ConsumerInteraction`] validates the stages received for one
//! transaction and decides where each one goes: the waiting synchronous
//! caller, the listener, or both for errors. Deciding happens under the
//! interaction's own lock. The waiting caller is answered right after the
//! lock is released; listener calls go through the interaction's callback
//! queue and run on their own task, in the order the stages were accepted.

use std::sync::Arc;

use mal_transport::{InteractionStage, Message, StandardError, TransactionId};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::callback::{Callback, CallbackQueue, error_callback, stage_callback};
use crate::error::{Error, Result};
use crate::handler::InteractionListener;
use crate::pattern::{self, Transition};

/// Outcome handed to a synchronous caller.
pub(crate) type Response = std::result::Result<Message, StandardError>;

/// One-shot cell filled with the first reply of a synchronous call.
pub(crate) type ResponseSlot = oneshot::Sender<Response>;

/// An in-flight interaction initiated by this process.
pub struct ConsumerInteraction {
    transaction_id: TransactionId,
    listener: Option<Arc<dyn InteractionListener>>,
    callbacks: Arc<CallbackQueue>,
    state: Mutex<InteractionState>,
}

struct InteractionState {
    last_stage: InteractionStage,
    finished: bool,
    slot: Option<ResponseSlot>,
}

impl ConsumerInteraction {
    pub(crate) fn new(
        transaction_id: TransactionId,
        last_stage: InteractionStage,
        slot: Option<ResponseSlot>,
        listener: Option<Arc<dyn InteractionListener>>,
    ) -> Self {
        Self {
            transaction_id,
            listener,
            callbacks: Arc::new(CallbackQueue::new()),
            state: Mutex::new(InteractionState {
                last_stage,
                finished: false,
                slot,
            }),
        }
    }

    /// Transaction this interaction belongs to.
    pub const fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Last stage sent or received.
    pub fn last_stage(&self) -> InteractionStage {
        self.state.lock().last_stage
    }

    /// Whether the terminal stage or an error has been processed.
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Validates an inbound stage and returns what to deliver.
    ///
    /// An illegal stage leaves the interaction untouched; the legal stage may
    /// still arrive.
    pub(crate) fn accept(&self, message: Message) -> Result<Delivery> {
        let stage = message.header().interaction_stage;
        let mut state = self.state.lock();

        if state.finished {
            return Err(Error::HandlerNotFound(self.transaction_id));
        }

        let Some(transition) = pattern::transition(state.last_stage, stage) else {
            return Err(Error::UnexpectedStage {
                transaction_id: self.transaction_id,
                last_stage: state.last_stage,
                stage,
            });
        };

        state.last_stage = stage;
        let slot = state.slot.take();

        if let Some(error) = message.error() {
            state.finished = true;
            return Ok(self.error_delivery(stage, error, slot));
        }

        state.finished = transition == Transition::Finish;
        match slot {
            Some(slot) => Ok(Delivery {
                reply: Some((slot, Ok(message))),
                callbacks: None,
            }),
            None => {
                let callbacks = self
                    .listener
                    .clone()
                    .and_then(|listener| self.queue(stage_callback(listener, message)));
                Ok(Delivery {
                    reply: None,
                    callbacks,
                })
            }
        }
    }

    /// Ends the interaction with an error that did not come from the peer.
    ///
    /// Returns `None` if the interaction already finished, which keeps
    /// transport errors and timeouts at-most-once.
    pub(crate) fn fail(&self, error: StandardError) -> Option<Delivery> {
        let mut state = self.state.lock();
        if state.finished {
            return None;
        }
        state.finished = true;

        let stage = pattern::error_stage(state.last_stage).unwrap_or(state.last_stage);
        let slot = state.slot.take();
        Some(self.error_delivery(stage, error, slot))
    }

    /// Errors go to the waiting caller and to the listener. Called with the
    /// state lock held so callbacks are queued in acceptance order.
    fn error_delivery(
        &self,
        stage: InteractionStage,
        error: StandardError,
        slot: Option<ResponseSlot>,
    ) -> Delivery {
        let callbacks = self.listener.clone().and_then(|listener| {
            self.queue(error_callback(
                listener,
                self.transaction_id,
                stage,
                error.clone(),
            ))
        });
        Delivery {
            reply: slot.map(|slot| (slot, Err(error))),
            callbacks,
        }
    }

    /// Queues a listener call; returns the queue when it needs a drain task.
    fn queue(&self, callback: Callback) -> Option<Arc<CallbackQueue>> {
        self.callbacks
            .push(callback)
            .then(|| self.callbacks.clone())
    }
}

impl std::fmt::Debug for ConsumerInteraction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConsumerInteraction")
            .field("transaction_id", &self.transaction_id)
            .field("last_stage", &state.last_stage)
            .field("finished", &state.finished)
            .field("waiting", &state.slot.is_some())
            .finish()
    }
}

/// A stage or error taken out of an interaction, ready to hand over.
#[derive(Debug)]
pub(crate) struct Delivery {
    reply: Option<(ResponseSlot, Response)>,
    callbacks: Option<Arc<CallbackQueue>>,
}

impl Delivery {
    /// Answers the waiting caller, if any, and starts the listener queue on
    /// `task_tracker` when it is idle. Never runs application code inline.
    pub(crate) fn dispatch(self, task_tracker: &TaskTracker) {
        if let Some((slot, response)) = self.reply {
            if slot.send(response).is_err() {
                debug!("Synchronous caller went away before its reply");
            }
        }
        if let Some(callbacks) = self.callbacks {
            callbacks.drain_on(task_tracker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use assert_matches::assert_matches;
    use bytes::Bytes;
    use chrono::Utc;
    use mal_transport::{ErrorCode, MessageBody, MessageHeader, QosProperties, Uri};

    fn message(stage: InteractionStage, is_error: bool) -> Message {
        let header = MessageHeader {
            uri_from: Uri::new("mem://provider"),
            uri_to: Uri::new("mem://consumer"),
            authentication_id: Bytes::new(),
            timestamp: Utc::now(),
            transaction_id: TransactionId::from_raw(9),
            interaction_type: stage.interaction_type(),
            interaction_stage: stage,
            service_area: 1,
            area_version: 1,
            service: 1,
            operation: 1,
            is_error,
            supplements: BTreeMap::new(),
            qos_properties: QosProperties::new(),
        };
        let body = if is_error {
            MessageBody::Error(StandardError::new(ErrorCode::Internal))
        } else {
            MessageBody::Empty
        };
        Message::new(header, body)
    }

    #[tokio::test]
    async fn test_invoke_ack_goes_to_slot_response_to_nobody() {
        let (tx, rx) = oneshot::channel();
        let interaction = ConsumerInteraction::new(
            TransactionId::from_raw(9),
            InteractionStage::Invoke,
            Some(tx),
            None,
        );

        interaction
            .accept(message(InteractionStage::InvokeAck, false))
            .unwrap()
            .dispatch(&TaskTracker::new());
        let ack = rx.await.unwrap().unwrap();
        assert_eq!(ack.header().interaction_stage, InteractionStage::InvokeAck);
        assert!(!interaction.is_finished());

        interaction
            .accept(message(InteractionStage::InvokeResponse, false))
            .unwrap()
            .dispatch(&TaskTracker::new());
        assert!(interaction.is_finished());
    }

    #[test]
    fn test_illegal_stage_keeps_interaction_open() {
        let interaction = ConsumerInteraction::new(
            TransactionId::from_raw(9),
            InteractionStage::Invoke,
            None,
            None,
        );

        assert_matches!(
            interaction.accept(message(InteractionStage::InvokeResponse, false)),
            Err(Error::UnexpectedStage {
                stage: InteractionStage::InvokeResponse,
                ..
            })
        );
        assert!(!interaction.is_finished());
        assert!(interaction.accept(message(InteractionStage::InvokeAck, false)).is_ok());
        assert_eq!(interaction.last_stage(), InteractionStage::InvokeAck);
    }

    #[test]
    fn test_error_reply_finishes_and_fail_is_then_ignored() {
        let interaction = ConsumerInteraction::new(
            TransactionId::from_raw(9),
            InteractionStage::Progress,
            None,
            None,
        );

        interaction
            .accept(message(InteractionStage::ProgressAck, false))
            .unwrap();
        interaction
            .accept(message(InteractionStage::ProgressResponse, true))
            .unwrap();

        assert!(interaction.is_finished());
        assert!(interaction.fail(StandardError::new(ErrorCode::DeliveryTimeout)).is_none());
        assert_matches!(
            interaction.accept(message(InteractionStage::ProgressUpdate, false)),
            Err(Error::HandlerNotFound(_))
        );
    }

    #[tokio::test]
    async fn test_fail_reaches_waiting_caller() {
        let (tx, rx) = oneshot::channel();
        let interaction = ConsumerInteraction::new(
            TransactionId::from_raw(9),
            InteractionStage::Request,
            Some(tx),
            None,
        );

        interaction
            .fail(StandardError::new(ErrorCode::DeliveryFailed))
            .unwrap()
            .dispatch(&TaskTracker::new());

        assert_eq!(
            rx.await.unwrap().unwrap_err().code,
            ErrorCode::DeliveryFailed
        );
    }
}
