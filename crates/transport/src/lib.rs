//! Transport abstraction for the interaction engine.
//!
//! This crate defines the message model every transport must carry and the
//! two seams between a transport and the engine above it:
//! - [`Transport`] builds and sends messages for one local endpoint
//! - [`MessageReceiver`] is handed inbound messages and transmit failures
//!
//! Concrete transports (in-memory, TCP, ...) live in separate crates.

pub mod error;
pub mod interaction;
pub mod message;
pub mod standard_error;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;

pub use error::TransportError;
pub use interaction::{InteractionStage, InteractionType};
pub use message::{
    EntityKey, Message, MessageBody, MessageHeader, QosProperties, Subscription, Update,
};
pub use standard_error::{ErrorCode, StandardError};
pub use types::{Identifier, TransactionId, Uri};

/// Inbound side of a transport endpoint.
///
/// Transports call these from their own tasks, any number of them
/// concurrently.
#[async_trait]
pub trait MessageReceiver: Send + Sync + 'static {
    /// A message arrived for this endpoint.
    async fn on_message(&self, message: Message);

    /// Several messages arrived at once.
    async fn on_messages(&self, messages: Vec<Message>) {
        for message in messages {
            self.on_message(message).await;
        }
    }

    /// A message previously sent from this endpoint could not be delivered.
    async fn on_transmit_error(&self, header: MessageHeader, error: StandardError);
}

/// One local endpoint of a transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// URI this endpoint is bound to.
    fn uri(&self) -> &Uri;

    /// Builds a message for transmission.
    ///
    /// Transports may stamp or transform the header; the default rejects
    /// headers whose stage does not belong to their interaction type.
    fn create_message(
        &self,
        header: MessageHeader,
        body: MessageBody,
    ) -> Result<Message, TransportError> {
        if !header.is_consistent() {
            return Err(TransportError::InvalidMessage(format!(
                "stage {} does not belong to interaction type {}",
                header.interaction_stage, header.interaction_type
            )));
        }
        Ok(Message::new(header, body))
    }

    /// Transmits a message to `message.header().uri_to`.
    async fn send_message(&self, message: Message) -> Result<(), TransportError>;

    /// Installs the receiver for inbound messages, replacing any previous one.
    fn set_receiver(&self, receiver: Arc<dyn MessageReceiver>);

    /// Stops accepting and delivering messages.
    async fn close(&self) -> Result<(), TransportError>;
}
