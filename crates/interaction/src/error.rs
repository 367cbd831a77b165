//! Error types for the interaction engine

use mal_transport::{
    ErrorCode, Identifier, InteractionStage, InteractionType, StandardError, TransactionId,
    TransportError, Uri,
};
use thiserror::Error;

/// Interaction engine errors
#[derive(Debug, Error)]
pub enum Error {
    /// No in-flight interaction matches the transaction id.
    ///
    /// This is the usual symptom of a lost, duplicated or reordered message.
    #[error("No handler found for transaction {0}")]
    HandlerNotFound(TransactionId),

    /// The transaction id is already tracked
    #[error("Transaction {0} is already tracked")]
    TransactionExists(TransactionId),

    /// A stage arrived, or was about to be sent, out of pattern order
    #[error("Unexpected stage {stage} after {last_stage} in transaction {transaction_id}")]
    UnexpectedStage {
        /// Transaction concerned
        transaction_id: TransactionId,
        /// Last stage seen
        last_stage: InteractionStage,
        /// Offending stage
        stage: InteractionStage,
    },

    /// The pattern has no such stage
    #[error("{interaction_type} interactions have no {operation}")]
    IllegalOperation {
        /// Interaction type of the call
        interaction_type: InteractionType,
        /// Requested operation
        operation: &'static str,
    },

    /// Operation called through the facade of another pattern
    #[error("Operation is a {actual} operation, not {expected}")]
    WrongInteractionType {
        /// Pattern of the facade method
        expected: InteractionType,
        /// Pattern of the operation
        actual: InteractionType,
    },

    /// Header stage does not belong to the header interaction type
    #[error("Stage {stage} does not belong to interaction type {interaction_type}")]
    InconsistentHeader {
        /// Declared interaction type
        interaction_type: InteractionType,
        /// Declared stage
        stage: InteractionStage,
    },

    /// No local provider for the destination of an inbound message
    #[error("No provider at {uri} for area {area} service {service}")]
    DestinationUnknown {
        /// Local endpoint URI
        uri: Uri,
        /// Service area
        area: u16,
        /// Service number
        service: u16,
    },

    /// A provider is already registered under this address
    #[error("Provider already registered at {uri} for area {area} service {service}")]
    ProviderExists {
        /// Local endpoint URI
        uri: Uri,
        /// Service area
        area: u16,
        /// Service number
        service: u16,
    },

    /// NOTIFY for a subscription nobody holds
    #[error("Unknown consumer: no subscription {subscription_id} at {uri}")]
    UnknownSubscription {
        /// Consumer endpoint URI
        uri: Uri,
        /// Subscription id
        subscription_id: Identifier,
    },

    /// Access control refused an outbound message
    #[error("Access control rejected message: {0}")]
    AccessDenied(StandardError),

    /// Transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The interaction ended with an error reply, transport failure or timeout
    #[error("Interaction error: {0}")]
    Interaction(StandardError),

    /// Configuration could not be read
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The standard error sent back to a peer when this error ends the
    /// processing of its message.
    pub fn to_standard_error(&self) -> StandardError {
        match self {
            Self::Interaction(error) | Self::AccessDenied(error) => error.clone(),
            Self::DestinationUnknown { .. } => {
                StandardError::with_info(ErrorCode::DestinationUnknown, self.to_string())
            }
            Self::HandlerNotFound(_)
            | Self::UnexpectedStage { .. }
            | Self::InconsistentHeader { .. }
            | Self::IllegalOperation { .. } => {
                StandardError::with_info(ErrorCode::IncorrectState, self.to_string())
            }
            Self::UnknownSubscription { .. } => {
                StandardError::with_info(ErrorCode::Unknown, self.to_string())
            }
            Self::Transport(_) => {
                StandardError::with_info(ErrorCode::DeliveryFailed, self.to_string())
            }
            _ => StandardError::internal(self.to_string()),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
