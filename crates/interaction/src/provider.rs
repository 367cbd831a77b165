//! Provider side of one inbound interaction.

use std::sync::Arc;

use bytes::Bytes;
use mal_transport::{
    Identifier, InteractionStage, InteractionType, MessageBody, MessageHeader, StandardError,
    Transport, Update,
};
use parking_lot::Mutex;
use tracing::debug;

use crate::access::AccessControl;
use crate::error::{Error, Result};
use crate::pattern::{self, Transition};
use crate::send::transmit;

/// Replies to one inbound call.
///
/// Handed to the [`InteractionHandler`](crate::InteractionHandler) with the
/// body of the initiating message. Each send operation emits exactly one
/// message and is checked against the stages of the pattern.
pub struct ProviderInteraction {
    header: MessageHeader,
    transport: Arc<dyn Transport>,
    access_control: Arc<dyn AccessControl>,
    authentication_id: Bytes,
    state: Mutex<ProviderState>,
}

struct ProviderState {
    last_stage: InteractionStage,
    finished: bool,
}

impl ProviderInteraction {
    pub(crate) fn new(
        header: MessageHeader,
        transport: Arc<dyn Transport>,
        access_control: Arc<dyn AccessControl>,
        authentication_id: Bytes,
    ) -> Self {
        let stage = header.interaction_stage;
        Self {
            header,
            transport,
            access_control,
            authentication_id,
            state: Mutex::new(ProviderState {
                last_stage: stage,
                finished: pattern::error_stage(stage).is_none(),
            }),
        }
    }

    /// Header of the initiating message.
    pub const fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// Interaction type of the call.
    pub const fn interaction_type(&self) -> InteractionType {
        self.header.interaction_type
    }

    /// Whether the consumer has been sent a terminal stage or an error.
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Sends the acknowledgement of a SUBMIT, INVOKE, PROGRESS or pub/sub
    /// registration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalOperation`] for patterns without one and
    /// [`Error::UnexpectedStage`] if it was already sent.
    pub async fn send_acknowledgement(&self, body: MessageBody) -> Result<()> {
        let stage = pattern::acknowledgement_stage(self.header.interaction_stage)
            .ok_or_else(|| self.illegal("acknowledgement"))?;
        self.reply(stage, body).await
    }

    /// Sends one PROGRESS update.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalOperation`] outside PROGRESS and
    /// [`Error::UnexpectedStage`] before the acknowledgement or after the
    /// response.
    pub async fn send_update(&self, body: MessageBody) -> Result<()> {
        if self.interaction_type() != InteractionType::Progress {
            return Err(self.illegal("update"));
        }
        self.reply(InteractionStage::ProgressUpdate, body).await
    }

    /// Sends the response of a REQUEST, INVOKE or PROGRESS.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalOperation`] for patterns without a response
    /// and [`Error::UnexpectedStage`] when sent out of order.
    pub async fn send_response(&self, body: MessageBody) -> Result<()> {
        let stage = pattern::response_stage(self.header.interaction_stage)
            .ok_or_else(|| self.illegal("response"))?;
        self.reply(stage, body).await
    }

    /// Ends the interaction with an error, sent at whichever stage comes
    /// next.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalOperation`] for SEND and
    /// [`Error::UnexpectedStage`] once the interaction is finished.
    pub async fn send_error(&self, error: StandardError) -> Result<()> {
        let stage = {
            let state = self.state.lock();
            if self.interaction_type() == InteractionType::Send {
                return Err(self.illegal("error"));
            }
            pattern::error_stage(state.last_stage).unwrap_or(state.last_stage)
        };
        self.reply_error(stage, error).await
    }

    /// Ends a PROGRESS interaction with an error carried as an update.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalOperation`] outside PROGRESS and
    /// [`Error::UnexpectedStage`] before the acknowledgement or after the
    /// response.
    pub async fn send_update_error(&self, error: StandardError) -> Result<()> {
        if self.interaction_type() != InteractionType::Progress {
            return Err(self.illegal("update error"));
        }
        self.reply_error(InteractionStage::ProgressUpdate, error).await
    }

    /// Sends a NOTIFY for the subscription registered by `register`.
    ///
    /// Only brokers call this, from the handling of a PUBLISH.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalOperation`] outside PUBLISH, or the failure
    /// of the transmission.
    pub async fn send_notify(
        &self,
        register: &MessageHeader,
        subscription_id: Identifier,
        updates: Vec<Update>,
    ) -> Result<()> {
        if self.header.interaction_stage != InteractionStage::Publish {
            return Err(self.illegal("notify"));
        }

        let mut header = register.reply(InteractionStage::Notify, false);
        header.uri_from = self.transport.uri().clone();
        header.authentication_id = self.authentication_id.clone();

        transmit(
            self.transport.as_ref(),
            self.access_control.as_ref(),
            header,
            MessageBody::Notify {
                subscription_id,
                updates,
            },
        )
        .await
    }

    async fn reply(&self, stage: InteractionStage, body: MessageBody) -> Result<()> {
        {
            let mut state = self.state.lock();
            let transition = pattern::transition(state.last_stage, stage)
                .filter(|_| !state.finished)
                .ok_or_else(|| self.unexpected(state.last_stage, stage))?;
            state.last_stage = stage;
            state.finished = transition == Transition::Finish;
        }

        self.transmit(stage, false, body).await
    }

    async fn reply_error(&self, stage: InteractionStage, error: StandardError) -> Result<()> {
        {
            let mut state = self.state.lock();
            let legal = !state.finished
                && (pattern::error_stage(state.last_stage) == Some(stage)
                    || pattern::transition(state.last_stage, stage).is_some());
            if !legal {
                return Err(self.unexpected(state.last_stage, stage));
            }
            state.last_stage = stage;
            state.finished = true;
        }

        self.transmit(stage, true, MessageBody::Error(error)).await
    }

    async fn transmit(&self, stage: InteractionStage, is_error: bool, body: MessageBody) -> Result<()> {
        let mut header = self.header.reply(stage, is_error);
        header.authentication_id = self.authentication_id.clone();

        debug!(
            transaction_id = %header.transaction_id,
            stage = %stage,
            is_error,
            "Provider reply"
        );

        transmit(
            self.transport.as_ref(),
            self.access_control.as_ref(),
            header,
            body,
        )
        .await
    }

    fn illegal(&self, operation: &'static str) -> Error {
        Error::IllegalOperation {
            interaction_type: self.interaction_type(),
            operation,
        }
    }

    fn unexpected(&self, last_stage: InteractionStage, stage: InteractionStage) -> Error {
        Error::UnexpectedStage {
            transaction_id: self.header.transaction_id,
            last_stage,
            stage,
        }
    }
}

impl std::fmt::Debug for ProviderInteraction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ProviderInteraction")
            .field("transaction_id", &self.header.transaction_id)
            .field("interaction_type", &self.header.interaction_type)
            .field("last_stage", &state.last_stage)
            .field("finished", &state.finished)
            .finish()
    }
}
