//! Publisher facade.

use std::sync::Arc;

use mal_transport::{
    EntityKey, InteractionStage, Message, MessageBody, TransactionId, Update,
};

use crate::context::ContextInner;
use crate::error::Result;
use crate::handler::InteractionListener;
use crate::send::{MessageDetails, Operation};

/// Publishes updates of one pub/sub operation through a broker.
///
/// Errors the broker raises against a PUBLISH go to the listener given at
/// registration.
#[derive(Clone)]
pub struct Publisher {
    context: Arc<ContextInner>,
    details: MessageDetails,
    operation: Operation,
}

impl Publisher {
    pub(crate) const fn new(
        context: Arc<ContextInner>,
        details: MessageDetails,
        operation: Operation,
    ) -> Self {
        Self {
            context,
            details,
            operation,
        }
    }

    /// PUBLISH_REGISTER the keys this publisher will publish, returning the
    /// acknowledgement.
    pub async fn register(
        &self,
        keys: Vec<EntityKey>,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<Message> {
        self.listen(listener);
        self.context
            .call(
                &self.details,
                &self.operation,
                InteractionStage::PublishRegister,
                MessageBody::PublishRegister(keys),
                None,
            )
            .await
    }

    /// Asynchronous PUBLISH_REGISTER. `listener` also receives the
    /// acknowledgement.
    pub async fn async_register(
        &self,
        keys: Vec<EntityKey>,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<TransactionId> {
        self.listen(listener.clone());
        let initiated = self
            .context
            .initiate(
                &self.details,
                &self.operation,
                InteractionStage::PublishRegister,
                MessageBody::PublishRegister(keys),
                false,
                Some(listener),
            )
            .await?;
        Ok(initiated.transaction_id)
    }

    /// PUBLISH updates. Nothing answers a successful publish.
    pub async fn publish(&self, updates: Vec<Update>) -> Result<TransactionId> {
        let initiated = self
            .context
            .initiate(
                &self.details,
                &self.operation,
                InteractionStage::Publish,
                MessageBody::Publish(updates),
                false,
                None,
            )
            .await?;
        Ok(initiated.transaction_id)
    }

    /// PUBLISH_DEREGISTER, returning the acknowledgement.
    pub async fn deregister(&self) -> Result<Message> {
        let reply = self
            .context
            .call(
                &self.details,
                &self.operation,
                InteractionStage::PublishDeregister,
                MessageBody::Empty,
                None,
            )
            .await?;
        self.unlisten();
        Ok(reply)
    }

    /// Asynchronous PUBLISH_DEREGISTER.
    pub async fn async_deregister(
        &self,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<TransactionId> {
        let initiated = self
            .context
            .initiate(
                &self.details,
                &self.operation,
                InteractionStage::PublishDeregister,
                MessageBody::Empty,
                false,
                Some(listener),
            )
            .await?;
        self.unlisten();
        Ok(initiated.transaction_id)
    }

    fn listen(&self, listener: Arc<dyn InteractionListener>) {
        self.context
            .pubsub
            .register_publish_listener(self.details.transport.uri().clone(), listener);
    }

    fn unlisten(&self) {
        self.context
            .pubsub
            .remove_publish_listener(self.details.transport.uri());
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("details", &self.details)
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}
