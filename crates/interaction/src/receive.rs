//! Inbound message dispatch.
//!
//! Replies go to the consumer interaction table, NOTIFY and publish errors
//! to the pub/sub listeners, and initiating stages to the provider
//! registered for the destination. No application code runs on the
//! transport's delivery task: provider handlers get a task per call and
//! listeners run from callback queues.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use mal_transport::{
    InteractionStage, Message, MessageBody, MessageHeader, MessageReceiver, StandardError,
    Transport,
};
use tracing::{debug, error, warn};

use crate::address::{Address, ServiceKey};
use crate::callback::{Callback, error_callback, stage_callback};
use crate::context::ContextInner;
use crate::error::{Error, Result};
use crate::handler::{InteractionHandler, panic_message};
use crate::pattern;
use crate::provider::ProviderInteraction;
use crate::send::transmit;

/// Receiver installed on every transport attached to a context.
pub(crate) struct EndpointReceiver {
    transport: Weak<dyn Transport>,
    context: Weak<ContextInner>,
}

impl EndpointReceiver {
    pub(crate) fn new(transport: &Arc<dyn Transport>, context: &Arc<ContextInner>) -> Self {
        Self {
            transport: Arc::downgrade(transport),
            context: Arc::downgrade(context),
        }
    }
}

#[async_trait]
impl MessageReceiver for EndpointReceiver {
    async fn on_message(&self, message: Message) {
        let (Some(transport), Some(context)) = (self.transport.upgrade(), self.context.upgrade())
        else {
            debug!("Context gone, dropping inbound message");
            return;
        };

        context.receive(transport, message).await;
    }

    async fn on_transmit_error(&self, header: MessageHeader, error: StandardError) {
        let Some(context) = self.context.upgrade() else {
            return;
        };

        context.transmit_failed(header, error);
    }
}

impl ContextInner {
    /// Processes one inbound message. Failures end here: they are answered
    /// when the message has a return stage and logged otherwise.
    pub(crate) async fn receive(self: &Arc<Self>, transport: Arc<dyn Transport>, message: Message) {
        let header = message.header().clone();

        debug!(
            transaction_id = %header.transaction_id,
            stage = %header.interaction_stage,
            from = %header.uri_from,
            is_error = header.is_error,
            "Inbound message"
        );

        let result = if !header.is_consistent() {
            Err(Error::InconsistentHeader {
                interaction_type: header.interaction_type,
                stage: header.interaction_stage,
            })
        } else {
            match header.interaction_stage {
                InteractionStage::Notify => self.receive_notify(message),
                InteractionStage::Publish if header.is_error => self.receive_publish_error(message),
                stage if pattern::is_initiating(stage) => {
                    self.dispatch_to_provider(&transport, message)
                }
                _ => self.table.handle_stage(message),
            }
        };

        if let Err(e) = result {
            self.reject(transport.as_ref(), &header, &e).await;
        }
    }

    /// Answers a failed inbound message with an error at its return stage.
    async fn reject(&self, transport: &dyn Transport, header: &MessageHeader, error: &Error) {
        let return_stage = if header.is_error {
            None
        } else {
            pattern::return_stage(header.interaction_stage)
        };

        let Some(return_stage) = return_stage else {
            warn!(
                transaction_id = %header.transaction_id,
                stage = %header.interaction_stage,
                from = %header.uri_from,
                "Dropping inbound message: {}",
                error
            );
            return;
        };

        debug!(
            transaction_id = %header.transaction_id,
            stage = %return_stage,
            "Answering inbound message with error: {}",
            error
        );

        let (reply_header, body) =
            Message::error_reply(header, return_stage, error.to_standard_error()).into_parts();
        if let Err(e) = transmit(transport, self.access_control.as_ref(), reply_header, body).await {
            warn!(transaction_id = %header.transaction_id, "Failed to send error reply: {}", e);
        }
    }

    fn receive_notify(&self, message: Message) -> Result<()> {
        let header = message.header();
        let uri = header.uri_to.clone();

        if let Some(error) = message.error() {
            let listeners = self.pubsub.get_notify_listeners(&uri);
            debug!(
                "Notify error for {} fans out to {} listeners",
                uri,
                listeners.len()
            );
            for (_, listener) in listeners {
                self.queue_pubsub_callback(error_callback(
                    listener,
                    header.transaction_id,
                    InteractionStage::Notify,
                    error.clone(),
                ));
            }
            return Ok(());
        }

        let MessageBody::Notify {
            subscription_id, ..
        } = message.body()
        else {
            return Err(Error::Internal("NOTIFY without notify body".to_string()));
        };

        let Some(listener) = self.pubsub.get_notify_listener(&uri, subscription_id) else {
            return Err(Error::UnknownSubscription {
                uri,
                subscription_id: subscription_id.clone(),
            });
        };

        self.queue_pubsub_callback(stage_callback(listener, message));

        Ok(())
    }

    fn receive_publish_error(&self, message: Message) -> Result<()> {
        let header = message.header();
        let error = message
            .error()
            .unwrap_or_else(|| StandardError::internal("publish error without error body"));

        match self.pubsub.get_publish_listener(&header.uri_to) {
            Some(listener) => self.queue_pubsub_callback(error_callback(
                listener,
                header.transaction_id,
                InteractionStage::Publish,
                error,
            )),
            None => warn!("Publish error for {} has no listener: {}", header.uri_to, error),
        }

        Ok(())
    }

    /// Hands an initiating stage to its provider on a tracked task.
    fn dispatch_to_provider(self: &Arc<Self>, transport: &Arc<dyn Transport>, message: Message) -> Result<()> {
        let header = message.header();
        let Some(address) = self.addresses.lookup(header) else {
            let service = ServiceKey::of(header);
            return Err(Error::DestinationUnknown {
                uri: header.uri_to.clone(),
                area: service.area,
                service: service.service,
            });
        };

        let (header, body) = message.into_parts();
        let interaction = Arc::new(ProviderInteraction::new(
            header,
            transport.clone(),
            self.access_control.clone(),
            address.authentication_id.clone(),
        ));

        self.task_tracker
            .spawn(run_provider(address, interaction, body));

        Ok(())
    }

    /// Routes a message the transport could not deliver. Only initiating
    /// stages belong to this context's consumer interactions; a failed reply
    /// belongs to the remote consumer's transaction and is only logged.
    pub(crate) fn transmit_failed(&self, header: MessageHeader, error: StandardError) {
        warn!(
            transaction_id = %header.transaction_id,
            stage = %header.interaction_stage,
            "Transmission failed: {}",
            error
        );

        if header.is_error || !pattern::is_initiating(header.interaction_stage) {
            debug!(
                transaction_id = %header.transaction_id,
                stage = %header.interaction_stage,
                "Dropping failed reply"
            );
            return;
        }

        if header.interaction_stage == InteractionStage::Publish {
            if let Some(listener) = self.pubsub.get_publish_listener(&header.uri_from) {
                self.queue_pubsub_callback(error_callback(
                    listener,
                    header.transaction_id,
                    InteractionStage::Publish,
                    error,
                ));
            }
            return;
        }

        if !self.table.handle_error(&header, error) {
            debug!(transaction_id = %header.transaction_id, "Transmit failure matched no interaction");
        }
    }

    fn queue_pubsub_callback(&self, callback: Callback) {
        self.pubsub_callbacks.enqueue(&self.task_tracker, callback);
    }
}

/// Runs the application handler for one inbound call and answers on its
/// behalf when it fails or leaves a registration unacknowledged.
async fn run_provider(address: Address, interaction: Arc<ProviderInteraction>, body: MessageBody) {
    let stage = interaction.header().interaction_stage;
    let transaction_id = interaction.header().transaction_id;

    let outcome = AssertUnwindSafe(call_handler(
        address.handler.as_ref(),
        interaction.clone(),
        stage,
        body,
    ))
    .catch_unwind()
    .await
    .unwrap_or_else(|panic| {
        error!(
            transaction_id = %transaction_id,
            stage = %stage,
            "Provider handler panicked: {}",
            panic_message(panic.as_ref())
        );
        Err(StandardError::internal(format!(
            "provider panicked: {}",
            panic_message(panic.as_ref())
        )))
    });

    let followup = match outcome {
        Ok(()) if is_acknowledged_on_success(stage) && !interaction.is_finished() => {
            interaction.send_acknowledgement(MessageBody::Empty).await
        }
        Ok(()) => Ok(()),
        Err(error) if stage == InteractionStage::Send => {
            warn!(transaction_id = %transaction_id, "SEND handler failed: {}", error);
            Ok(())
        }
        Err(error) if interaction.is_finished() => {
            warn!(
                transaction_id = %transaction_id,
                "Handler failed after the interaction finished: {}",
                error
            );
            Ok(())
        }
        Err(error) => interaction.send_error(error).await,
    };

    if let Err(e) = followup {
        warn!(transaction_id = %transaction_id, stage = %stage, "Failed to answer inbound call: {}", e);
    }
}

async fn call_handler(
    handler: &dyn InteractionHandler,
    interaction: Arc<ProviderInteraction>,
    stage: InteractionStage,
    body: MessageBody,
) -> std::result::Result<(), StandardError> {
    match stage {
        InteractionStage::Send => handler.handle_send(interaction, body).await,
        InteractionStage::Submit => handler.handle_submit(interaction, body).await,
        InteractionStage::Request => handler.handle_request(interaction, body).await,
        InteractionStage::Invoke => handler.handle_invoke(interaction, body).await,
        InteractionStage::Progress => handler.handle_progress(interaction, body).await,
        InteractionStage::Register => handler.handle_register(interaction, body).await,
        InteractionStage::PublishRegister => {
            handler.handle_publish_register(interaction, body).await
        }
        InteractionStage::Publish => handler.handle_publish(interaction, body).await,
        InteractionStage::Deregister => handler.handle_deregister(interaction, body).await,
        InteractionStage::PublishDeregister => {
            handler.handle_publish_deregister(interaction, body).await
        }
        other => Err(StandardError::internal(format!("{other} is not an initiating stage"))),
    }
}

const fn is_acknowledged_on_success(stage: InteractionStage) -> bool {
    matches!(
        stage,
        InteractionStage::Register
            | InteractionStage::PublishRegister
            | InteractionStage::Deregister
            | InteractionStage::PublishDeregister
    )
}
