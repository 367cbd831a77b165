//! Application callbacks.
//!
//! Consumers receive stages through an [`InteractionListener`]; providers
//! implement [`InteractionHandler`] for the operations they serve.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use mal_transport::{
    ErrorCode, InteractionStage, Message, MessageBody, StandardError, TransactionId,
};

use crate::provider::ProviderInteraction;

/// Receives the stages of a consumer or publisher interaction.
///
/// Each stage and each error is delivered at most once, from whichever task
/// processed it. Implementations must not assume any particular task.
#[async_trait]
pub trait InteractionListener: Send + Sync + 'static {
    /// A normal stage arrived.
    async fn stage_received(&self, message: Message);

    /// The interaction ended with an error: an error reply, a transmit
    /// failure or a timeout.
    async fn stage_error_received(
        &self,
        transaction_id: TransactionId,
        stage: InteractionStage,
        error: StandardError,
    );
}

/// Provider-side operations, one method per initiating stage.
///
/// Every method answers `UNSUPPORTED_OPERATION` unless overridden. An `Err`
/// returned before the interaction finished is sent back to the consumer as
/// the error reply at the proper stage.
#[async_trait]
#[allow(unused_variables)]
pub trait InteractionHandler: Send + Sync + 'static {
    /// One-way SEND. Errors are logged, never answered.
    async fn handle_send(
        &self,
        interaction: Arc<ProviderInteraction>,
        body: MessageBody,
    ) -> Result<(), StandardError> {
        Err(unsupported())
    }

    /// SUBMIT, answered with `send_acknowledgement`.
    async fn handle_submit(
        &self,
        interaction: Arc<ProviderInteraction>,
        body: MessageBody,
    ) -> Result<(), StandardError> {
        Err(unsupported())
    }

    /// REQUEST, answered with `send_response`.
    async fn handle_request(
        &self,
        interaction: Arc<ProviderInteraction>,
        body: MessageBody,
    ) -> Result<(), StandardError> {
        Err(unsupported())
    }

    /// INVOKE, answered with `send_acknowledgement` then `send_response`.
    async fn handle_invoke(
        &self,
        interaction: Arc<ProviderInteraction>,
        body: MessageBody,
    ) -> Result<(), StandardError> {
        Err(unsupported())
    }

    /// PROGRESS, answered with an acknowledgement, updates and a response.
    async fn handle_progress(
        &self,
        interaction: Arc<ProviderInteraction>,
        body: MessageBody,
    ) -> Result<(), StandardError> {
        Err(unsupported())
    }

    /// REGISTER of a subscription. Acknowledged automatically on `Ok`.
    async fn handle_register(
        &self,
        interaction: Arc<ProviderInteraction>,
        body: MessageBody,
    ) -> Result<(), StandardError> {
        Err(unsupported())
    }

    /// PUBLISH_REGISTER of a publisher. Acknowledged automatically on `Ok`.
    async fn handle_publish_register(
        &self,
        interaction: Arc<ProviderInteraction>,
        body: MessageBody,
    ) -> Result<(), StandardError> {
        Err(unsupported())
    }

    /// PUBLISH of updates. An `Err` goes back to the publisher.
    async fn handle_publish(
        &self,
        interaction: Arc<ProviderInteraction>,
        body: MessageBody,
    ) -> Result<(), StandardError> {
        Err(unsupported())
    }

    /// DEREGISTER of subscriptions. Acknowledged automatically on `Ok`.
    async fn handle_deregister(
        &self,
        interaction: Arc<ProviderInteraction>,
        body: MessageBody,
    ) -> Result<(), StandardError> {
        Err(unsupported())
    }

    /// PUBLISH_DEREGISTER of a publisher. Acknowledged automatically on `Ok`.
    async fn handle_publish_deregister(
        &self,
        interaction: Arc<ProviderInteraction>,
        body: MessageBody,
    ) -> Result<(), StandardError> {
        Err(unsupported())
    }
}

fn unsupported() -> StandardError {
    StandardError::new(ErrorCode::UnsupportedOperation)
}

/// Renders a caught panic payload for logs and error replies.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
