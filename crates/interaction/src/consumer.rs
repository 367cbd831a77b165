//! Consumer facade.
//!
//! Blocking-style methods suspend until the first reply: the acknowledgement
//! of SUBMIT, INVOKE and PROGRESS, the response of REQUEST. Later stages go
//! to the listener. `async_*` methods return as soon as the message is sent
//! and deliver every stage to the listener.

use std::sync::Arc;

use mal_transport::{
    Identifier, InteractionStage, InteractionType, Message, MessageBody, Subscription,
    TransactionId,
};

use crate::context::ContextInner;
use crate::error::{Error, Result};
use crate::handler::InteractionListener;
use crate::send::{MessageDetails, Operation};

/// Calls the operations of one remote provider.
#[derive(Clone)]
pub struct Consumer {
    context: Arc<ContextInner>,
    details: MessageDetails,
}

impl Consumer {
    pub(crate) const fn new(context: Arc<ContextInner>, details: MessageDetails) -> Self {
        Self { context, details }
    }

    /// Message details used for every call.
    pub const fn details(&self) -> &MessageDetails {
        &self.details
    }

    /// One-way SEND.
    pub async fn send(&self, operation: &Operation, body: MessageBody) -> Result<TransactionId> {
        operation.expect(InteractionType::Send)?;
        let initiated = self
            .context
            .initiate(&self.details, operation, InteractionStage::Send, body, false, None)
            .await?;
        Ok(initiated.transaction_id)
    }

    /// SUBMIT, returning the acknowledgement.
    pub async fn submit(&self, operation: &Operation, body: MessageBody) -> Result<Message> {
        operation.expect(InteractionType::Submit)?;
        self.context
            .call(&self.details, operation, InteractionStage::Submit, body, None)
            .await
    }

    /// REQUEST, returning the response.
    pub async fn request(&self, operation: &Operation, body: MessageBody) -> Result<Message> {
        operation.expect(InteractionType::Request)?;
        self.context
            .call(&self.details, operation, InteractionStage::Request, body, None)
            .await
    }

    /// INVOKE, returning the acknowledgement. The response goes to
    /// `listener`.
    pub async fn invoke(
        &self,
        operation: &Operation,
        body: MessageBody,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<Message> {
        operation.expect(InteractionType::Invoke)?;
        self.context
            .call(
                &self.details,
                operation,
                InteractionStage::Invoke,
                body,
                Some(listener),
            )
            .await
    }

    /// PROGRESS, returning the acknowledgement. Updates and the response go
    /// to `listener`.
    pub async fn progress(
        &self,
        operation: &Operation,
        body: MessageBody,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<Message> {
        operation.expect(InteractionType::Progress)?;
        self.context
            .call(
                &self.details,
                operation,
                InteractionStage::Progress,
                body,
                Some(listener),
            )
            .await
    }

    /// REGISTER a subscription, returning the acknowledgement. NOTIFY
    /// deliveries for the subscription go to `listener`.
    pub async fn register(
        &self,
        operation: &Operation,
        subscription: Subscription,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<Message> {
        operation.expect(InteractionType::PubSub)?;
        let subscription_id = subscription.id.clone();
        self.listen(subscription_id.clone(), listener);

        let result = self
            .context
            .call(
                &self.details,
                operation,
                InteractionStage::Register,
                MessageBody::Register(subscription),
                None,
            )
            .await;
        if result.is_err() {
            self.unlisten(&[subscription_id]);
        }
        result
    }

    /// DEREGISTER subscriptions, returning the acknowledgement. Their
    /// listeners stop receiving NOTIFY immediately.
    pub async fn deregister(
        &self,
        operation: &Operation,
        subscription_ids: Vec<Identifier>,
    ) -> Result<Message> {
        operation.expect(InteractionType::PubSub)?;
        self.unlisten(&subscription_ids);
        self.context
            .call(
                &self.details,
                operation,
                InteractionStage::Deregister,
                MessageBody::Deregister(subscription_ids),
                None,
            )
            .await
    }

    /// Asynchronous SUBMIT.
    pub async fn async_submit(
        &self,
        operation: &Operation,
        body: MessageBody,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<TransactionId> {
        operation.expect(InteractionType::Submit)?;
        self.start(operation, InteractionStage::Submit, body, listener)
            .await
    }

    /// Asynchronous REQUEST.
    pub async fn async_request(
        &self,
        operation: &Operation,
        body: MessageBody,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<TransactionId> {
        operation.expect(InteractionType::Request)?;
        self.start(operation, InteractionStage::Request, body, listener)
            .await
    }

    /// Asynchronous INVOKE.
    pub async fn async_invoke(
        &self,
        operation: &Operation,
        body: MessageBody,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<TransactionId> {
        operation.expect(InteractionType::Invoke)?;
        self.start(operation, InteractionStage::Invoke, body, listener)
            .await
    }

    /// Asynchronous PROGRESS.
    pub async fn async_progress(
        &self,
        operation: &Operation,
        body: MessageBody,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<TransactionId> {
        operation.expect(InteractionType::Progress)?;
        self.start(operation, InteractionStage::Progress, body, listener)
            .await
    }

    /// Asynchronous REGISTER. `listener` receives the acknowledgement and
    /// every NOTIFY of the subscription.
    pub async fn async_register(
        &self,
        operation: &Operation,
        subscription: Subscription,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<TransactionId> {
        operation.expect(InteractionType::PubSub)?;
        let subscription_id = subscription.id.clone();
        self.listen(subscription_id.clone(), listener.clone());

        let result = self
            .start(
                operation,
                InteractionStage::Register,
                MessageBody::Register(subscription),
                listener,
            )
            .await;
        if result.is_err() {
            self.unlisten(&[subscription_id]);
        }
        result
    }

    /// Asynchronous DEREGISTER.
    pub async fn async_deregister(
        &self,
        operation: &Operation,
        subscription_ids: Vec<Identifier>,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<TransactionId> {
        operation.expect(InteractionType::PubSub)?;
        self.unlisten(&subscription_ids);
        self.start(
            operation,
            InteractionStage::Deregister,
            MessageBody::Deregister(subscription_ids),
            listener,
        )
        .await
    }

    /// Resumes an interaction started before a restart. Its remaining
    /// stages go to `listener`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongInteractionType`] if `last_stage` does not
    /// belong to the operation and [`Error::TransactionExists`] if the
    /// transaction is already tracked.
    pub fn continue_interaction(
        &self,
        operation: &Operation,
        last_stage: InteractionStage,
        transaction_id: TransactionId,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<()> {
        if last_stage.interaction_type() != operation.interaction_type {
            return Err(Error::WrongInteractionType {
                expected: operation.interaction_type,
                actual: last_stage.interaction_type(),
            });
        }
        self.context
            .table
            .continue_transaction(last_stage, transaction_id, listener)
    }

    async fn start(
        &self,
        operation: &Operation,
        stage: InteractionStage,
        body: MessageBody,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<TransactionId> {
        let initiated = self
            .context
            .initiate(&self.details, operation, stage, body, false, Some(listener))
            .await?;
        Ok(initiated.transaction_id)
    }

    fn listen(&self, subscription_id: Identifier, listener: Arc<dyn InteractionListener>) {
        self.context.pubsub.register_notify_listener(
            self.details.transport.uri().clone(),
            subscription_id,
            listener,
        );
    }

    fn unlisten(&self, subscription_ids: &[Identifier]) {
        self.context
            .pubsub
            .deregister_notify_listeners(self.details.transport.uri(), subscription_ids);
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("details", &self.details)
            .finish_non_exhaustive()
    }
}
