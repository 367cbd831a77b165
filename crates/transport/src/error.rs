//! Transport error types.

use thiserror::Error;

use crate::types::Uri;

/// Errors raised by transports while creating or transmitting messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Transport has been closed and no longer accepts messages.
    #[error("Transport for {0} is closed")]
    Closed(Uri),

    /// No endpoint is bound at the destination URI.
    #[error("Destination unknown: {0}")]
    DestinationUnknown(Uri),

    /// An endpoint is already bound at this URI.
    #[error("Endpoint already bound at {0}")]
    AlreadyBound(Uri),

    /// Message could not be built from the supplied header and body.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Message could not be transmitted.
    #[error("Transmission failed: {0}")]
    Transmission(String),
}
